//! Remote commands: typed payloads, the status machine, and the operator and device
//! operations on it. Delivery lives in [`crate::dispatcher`].
//!
//! Every transition is a guarded `UPDATE ... WHERE status IN (...)`, so concurrent
//! writers can only ever move a command forward.

use crate::devices::{self, DeviceStatus};
use crate::entities;
use crate::errors::TetherError;
use crate::settings::Dispatch;
use crate::storage;
use crate::tenant::{Permission, TenantContext, TenantScoped};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Queued,
    Sent,
    Executing,
    Success,
    Failed,
    Timeout,
    Cancelled,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Queued => "queued",
            CommandStatus::Sent => "sent",
            CommandStatus::Executing => "executing",
            CommandStatus::Success => "success",
            CommandStatus::Failed => "failed",
            CommandStatus::Timeout => "timeout",
            CommandStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandStatus::Success
                | CommandStatus::Failed
                | CommandStatus::Timeout
                | CommandStatus::Cancelled
        )
    }

    /// Position in `pending, queued, sent, executing, <terminal>`.
    pub fn rank(&self) -> u8 {
        match self {
            CommandStatus::Pending => 0,
            CommandStatus::Queued => 1,
            CommandStatus::Sent => 2,
            CommandStatus::Executing => 3,
            _ => 4,
        }
    }

    /// Whether moving from `self` to `next` keeps the observed sequence monotonic.
    pub fn can_transition_to(&self, next: CommandStatus) -> bool {
        !self.is_terminal() && next.rank() >= self.rank() && *self != next
    }

    pub(crate) fn non_terminal() -> [&'static str; 4] {
        [
            CommandStatus::Pending.as_str(),
            CommandStatus::Queued.as_str(),
            CommandStatus::Sent.as_str(),
            CommandStatus::Executing.as_str(),
        ]
    }
}

impl FromStr for CommandStatus {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CommandStatus::Pending),
            "queued" => Ok(CommandStatus::Queued),
            "sent" => Ok(CommandStatus::Sent),
            "executing" => Ok(CommandStatus::Executing),
            "success" => Ok(CommandStatus::Success),
            "failed" => Ok(CommandStatus::Failed),
            "timeout" => Ok(CommandStatus::Timeout),
            "cancelled" => Ok(CommandStatus::Cancelled),
            other => Err(TetherError::Other(format!("unknown command status: {other}"))),
        }
    }
}

/// Command type with its typed payload. Serialized as `{"type": ..., "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    Ping {},
    LocateNow {
        #[serde(default)]
        high_accuracy: bool,
    },
    Lock {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phone_number: Option<String>,
    },
    Unlock {},
    Wipe {
        #[serde(default)]
        include_external_storage: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Screenshot {},
    InstallApp {
        package_name: String,
        download_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version_code: Option<i64>,
    },
    UninstallApp {
        package_name: String,
    },
    SyncData {
        #[serde(default)]
        categories: Vec<String>,
    },
}

impl CommandKind {
    /// Build from the stored or submitted `(type, payload)` pair. A missing payload is
    /// treated as an empty object.
    pub fn from_parts(command_type: &str, payload: Option<Value>) -> Result<Self, TetherError> {
        let command_type = command_type.trim().to_ascii_uppercase();
        let payload = match payload {
            None | Some(Value::Null) => json!({}),
            Some(p) => p,
        };
        serde_json::from_value(json!({ "type": command_type, "payload": payload })).map_err(
            |e| TetherError::BadRequest(format!("invalid {command_type} command: {e}")),
        )
    }

    pub fn command_type(&self) -> &'static str {
        match self {
            CommandKind::Ping {} => "PING",
            CommandKind::LocateNow { .. } => "LOCATE_NOW",
            CommandKind::Lock { .. } => "LOCK",
            CommandKind::Unlock {} => "UNLOCK",
            CommandKind::Wipe { .. } => "WIPE",
            CommandKind::Screenshot {} => "SCREENSHOT",
            CommandKind::InstallApp { .. } => "INSTALL_APP",
            CommandKind::UninstallApp { .. } => "UNINSTALL_APP",
            CommandKind::SyncData { .. } => "SYNC_DATA",
        }
    }

    pub fn payload(&self) -> Result<Value, TetherError> {
        let mut tagged = serde_json::to_value(self)?;
        Ok(tagged
            .get_mut("payload")
            .map(Value::take)
            .unwrap_or_else(|| json!({})))
    }

    /// Irreversible on the device; gated behind a separate permission.
    pub fn is_destructive(&self) -> bool {
        matches!(self, CommandKind::Wipe { .. })
    }

    fn validate(&self) -> Result<(), TetherError> {
        match self {
            CommandKind::InstallApp {
                package_name,
                download_url,
                ..
            } => {
                if package_name.trim().is_empty() {
                    return Err(TetherError::BadRequest("package_name is required".to_string()));
                }
                if !(download_url.starts_with("https://") || download_url.starts_with("http://")) {
                    return Err(TetherError::BadRequest(
                        "download_url must be an http(s) URL".to_string(),
                    ));
                }
                Ok(())
            }
            CommandKind::UninstallApp { package_name } if package_name.trim().is_empty() => {
                Err(TetherError::BadRequest("package_name is required".to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// What goes over the notification transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub command_id: String,
    #[serde(flatten)]
    pub kind: CommandKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    pub organization_id: String,
    pub device_id: String,
    #[serde(flatten)]
    pub kind: CommandKind,
    pub status: CommandStatus,
    pub attempt_count: i64,
    pub max_attempts: i64,
    pub timeout_secs: i64,
    pub error: Option<String>,
    pub result_payload: Option<Value>,
    pub issued_by: String,
    pub created_at: i64,
    pub scheduled_at: i64,
    pub sent_at: Option<i64>,
    pub executed_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub expires_at: i64,
}

impl TryFrom<entities::command::Model> for Command {
    type Error = TetherError;

    fn try_from(model: entities::command::Model) -> Result<Self, Self::Error> {
        let payload: Value = serde_json::from_str(&model.payload)?;
        Ok(Command {
            kind: CommandKind::from_parts(&model.command_type, Some(payload))?,
            status: model.status.parse()?,
            result_payload: model
                .result_payload
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            id: model.id,
            organization_id: model.organization_id,
            device_id: model.device_id,
            attempt_count: model.attempt_count,
            max_attempts: model.max_attempts,
            timeout_secs: model.timeout_secs,
            error: model.error,
            issued_by: model.issued_by,
            created_at: model.created_at,
            scheduled_at: model.scheduled_at,
            sent_at: model.sent_at,
            executed_at: model.executed_at,
            completed_at: model.completed_at,
            expires_at: model.expires_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandAttempt {
    pub attempt_number: i64,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub outcome: String,
    pub error: Option<String>,
}

impl From<entities::command_attempt::Model> for CommandAttempt {
    fn from(model: entities::command_attempt::Model) -> Self {
        CommandAttempt {
            attempt_number: model.attempt_number,
            started_at: model.started_at,
            finished_at: model.finished_at,
            outcome: model.outcome,
            error: model.error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub kind: CommandKind,
    pub timeout_secs: Option<i64>,
    pub max_attempts: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportOutcome {
    /// Acknowledged and started
    Executing,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultReport {
    pub command_id: String,
    pub outcome: ReportOutcome,
    #[serde(default)]
    pub result_payload: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

fn not_found() -> TetherError {
    TetherError::NotFound("command not found".to_string())
}

async fn find_scoped(
    db: &DatabaseConnection,
    organization_id: &str,
    command_id: &str,
) -> Result<Option<entities::command::Model>, TetherError> {
    use entities::command::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::Id.eq(command_id))
        .filter(Column::OrganizationId.eq(organization_id))
        .one(db)
        .await?)
}

/// Queue a command for a device. Delivery happens asynchronously in the dispatcher.
pub async fn enqueue(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    cfg: &Dispatch,
    device_id: &str,
    request: EnqueueRequest,
) -> Result<Command, TetherError> {
    ctx.require(Permission::IssueCommands)?;
    if request.kind.is_destructive() {
        ctx.require(Permission::IssueDestructiveCommands)?;
    }
    request.kind.validate()?;

    let timeout_secs = request.timeout_secs.unwrap_or(cfg.default_timeout_secs);
    if timeout_secs <= 0 || timeout_secs > cfg.max_timeout_secs {
        return Err(TetherError::BadRequest(format!(
            "timeout must be between 1 and {} seconds",
            cfg.max_timeout_secs
        )));
    }
    let max_attempts = request.max_attempts.unwrap_or(cfg.default_max_attempts);
    if max_attempts < 1 || max_attempts > cfg.max_attempts_limit {
        return Err(TetherError::BadRequest(format!(
            "max_attempts must be between 1 and {}",
            cfg.max_attempts_limit
        )));
    }

    let device = devices::find_active(db, ctx.organization_id(), device_id)
        .await?
        .ok_or_else(|| TetherError::NotFound("device not found".to_string()))?;
    if device.status == DeviceStatus::Maintenance.as_str() {
        return Err(TetherError::Conflict(
            "device is in maintenance and refuses commands".to_string(),
        ));
    }

    let now = storage::now();
    let model = entities::command::ActiveModel {
        id: Set(storage::random_id()),
        organization_id: Set(ctx.organization_id().to_string()),
        device_id: Set(device.id),
        command_type: Set(request.kind.command_type().to_string()),
        payload: Set(serde_json::to_string(&request.kind.payload()?)?),
        status: Set(CommandStatus::Pending.as_str().to_string()),
        attempt_count: Set(0),
        max_attempts: Set(max_attempts),
        timeout_secs: Set(timeout_secs),
        error: Set(None),
        result_payload: Set(None),
        issued_by: Set(ctx.subject.clone()),
        created_at: Set(now),
        scheduled_at: Set(now),
        sent_at: Set(None),
        executed_at: Set(None),
        completed_at: Set(None),
        expires_at: Set(now + timeout_secs),
        updated_at: Set(now),
    }
    .insert(db)
    .await?;

    tracing::info!(
        command_id = %model.id,
        device_id = %model.device_id,
        command_type = %model.command_type,
        issued_by = %ctx.subject,
        "Command enqueued"
    );
    model.try_into()
}

pub async fn get_command(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    command_id: &str,
) -> Result<Command, TetherError> {
    ctx.require(Permission::ViewDevices)?;
    find_scoped(db, ctx.organization_id(), command_id)
        .await?
        .ok_or_else(not_found)?
        .try_into()
}

/// Commands for one device, newest first. Retired devices keep their history.
pub async fn list_device_commands(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    device_id: &str,
    limit: u64,
) -> Result<Vec<Command>, TetherError> {
    use entities::command::{Column, Entity};

    ctx.require(Permission::ViewDevices)?;
    devices::find_any(db, ctx.organization_id(), device_id)
        .await?
        .ok_or_else(|| TetherError::NotFound("device not found".to_string()))?;

    Entity::find()
        .filter(Column::OrganizationId.eq(ctx.organization_id()))
        .filter(Column::DeviceId.eq(device_id))
        .order_by_desc(Column::CreatedAt)
        .limit(limit)
        .all(db)
        .await?
        .into_iter()
        .map(Command::try_from)
        .collect()
}

pub async fn list_attempts(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    command_id: &str,
) -> Result<Vec<CommandAttempt>, TetherError> {
    use entities::command_attempt::{Column, Entity};

    ctx.require(Permission::ViewDevices)?;
    find_scoped(db, ctx.organization_id(), command_id)
        .await?
        .ok_or_else(not_found)?;

    Ok(Entity::find()
        .filter(Column::CommandId.eq(command_id))
        .filter(Column::OrganizationId.eq(ctx.organization_id()))
        .order_by_asc(Column::AttemptNumber)
        .all(db)
        .await?
        .into_iter()
        .map(CommandAttempt::from)
        .collect())
}

/// Stop further delivery attempts. A message already handed to the transport is not
/// recalled.
pub async fn cancel(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    command_id: &str,
) -> Result<Command, TetherError> {
    use entities::command::{Column, Entity};

    ctx.require(Permission::CancelCommands)?;
    let now = storage::now();

    let result = Entity::update_many()
        .col_expr(Column::Status, Expr::value(CommandStatus::Cancelled.as_str()))
        .col_expr(Column::CompletedAt, Expr::value(now))
        .col_expr(Column::UpdatedAt, Expr::value(now))
        .filter(Column::Id.eq(command_id))
        .filter(Column::OrganizationId.eq(ctx.organization_id()))
        .filter(Column::Status.is_in([
            CommandStatus::Pending.as_str(),
            CommandStatus::Queued.as_str(),
            CommandStatus::Sent.as_str(),
        ]))
        .exec(db)
        .await?;

    let current: Command = find_scoped(db, ctx.organization_id(), command_id)
        .await?
        .ok_or_else(not_found)?
        .try_into()?;

    if result.rows_affected > 0 {
        tracing::info!(command_id, cancelled_by = %ctx.subject, "Command cancelled");
        return Ok(current);
    }
    match current.status {
        CommandStatus::Cancelled => Ok(current),
        status => Err(TetherError::Conflict(format!(
            "command is {} and can no longer be cancelled",
            status.as_str()
        ))),
    }
}

/// Device-reported outcome. Duplicate and late reports for a command that is already
/// terminal return it unchanged.
pub async fn report_result(
    db: &DatabaseConnection,
    scope: &impl TenantScoped,
    report: ResultReport,
) -> Result<Command, TetherError> {
    use entities::command::{Column, Entity};

    let organization_id = scope.organization_id();
    let command_id = report.command_id.as_str();
    let now = storage::now();

    let update = match report.outcome {
        // Only a delivered command can be acknowledged
        ReportOutcome::Executing => Entity::update_many()
            .col_expr(Column::Status, Expr::value(CommandStatus::Executing.as_str()))
            .col_expr(Column::ExecutedAt, Expr::value(now))
            .filter(Column::Status.eq(CommandStatus::Sent.as_str())),
        outcome => {
            let status = match outcome {
                ReportOutcome::Success => CommandStatus::Success,
                _ => CommandStatus::Failed,
            };
            let result_payload = report
                .result_payload
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            Entity::update_many()
                .col_expr(Column::Status, Expr::value(status.as_str()))
                .col_expr(Column::ResultPayload, Expr::value(result_payload))
                .col_expr(Column::Error, Expr::value(report.error.clone()))
                .col_expr(Column::CompletedAt, Expr::value(now))
                .filter(Column::Status.is_in(CommandStatus::non_terminal()))
        }
    };

    let result = update
        .col_expr(Column::UpdatedAt, Expr::value(now))
        .filter(Column::Id.eq(command_id))
        .filter(Column::OrganizationId.eq(organization_id))
        .filter(Column::ExpiresAt.gt(now))
        .exec(db)
        .await?;

    let current: Command = find_scoped(db, organization_id, command_id)
        .await?
        .ok_or_else(not_found)?
        .try_into()?;

    if result.rows_affected > 0 {
        tracing::info!(
            command_id,
            status = current.status.as_str(),
            "Command result reported"
        );
        return Ok(current);
    }

    if current.status.is_terminal()
        || (report.outcome == ReportOutcome::Executing
            && current.status == CommandStatus::Executing)
    {
        tracing::debug!(command_id, status = current.status.as_str(), "Duplicate result report");
        return Ok(current);
    }
    if current.expires_at <= now {
        return Err(TetherError::Expired(
            "command window has lapsed; awaiting retry or timeout".to_string(),
        ));
    }
    Err(TetherError::Conflict(format!(
        "command is {}",
        current.status.as_str()
    )))
}
