//! Command delivery worker.
//!
//! Driven by periodic jobs rather than per-command timers: `dispatch_due` hands due
//! pending/queued commands to the transport and `sweep_timeouts` retries or closes
//! commands whose window has lapsed. After a restart, running both again is all the
//! recovery there is.

use crate::commands::{CommandEnvelope, CommandKind, CommandStatus};
use crate::entities;
use crate::errors::TetherError;
use crate::settings::Dispatch;
use crate::storage;
use crate::transport::{NotificationTransport, TransportError};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const NO_DELIVERY_CHANNEL: &str = "no delivery channel";

/// What a single dispatch call did to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Accepted by the transport
    Sent,
    /// Transport failed; another attempt is scheduled
    Retrying,
    Failed,
    TimedOut,
    /// Lost a race with another writer, or nothing left to do
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub sent: u64,
    pub retrying: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub skipped: u64,
    pub errors: u64,
}

impl DispatchReport {
    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Sent => self.sent += 1,
            DispatchOutcome::Retrying => self.retrying += 1,
            DispatchOutcome::Failed => self.failed += 1,
            DispatchOutcome::TimedOut => self.timed_out += 1,
            DispatchOutcome::Skipped => self.skipped += 1,
        }
    }

    fn merge(&mut self, other: DispatchReport) {
        self.sent += other.sent;
        self.retrying += other.retrying;
        self.failed += other.failed;
        self.timed_out += other.timed_out;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }

    /// Commands whose state changed.
    pub fn processed(&self) -> u64 {
        self.sent + self.retrying + self.failed + self.timed_out
    }
}

/// Delay before attempt `attempt + 1`: `base * 2^(attempt-1)`, capped.
pub fn backoff_secs(cfg: &Dispatch, attempt: i64) -> i64 {
    let exponent = (attempt.max(1) - 1).min(30) as u32;
    cfg.backoff_base_secs
        .saturating_mul(1i64 << exponent)
        .min(cfg.backoff_max_secs)
}

/// How long a claimed attempt keeps other workers off the command: the transport
/// call limit rounded up to whole seconds, plus one.
pub fn lease_secs(cfg: &Dispatch) -> i64 {
    let call_secs = cfg.transport_timeout_ms.div_ceil(1000);
    i64::try_from(call_secs).unwrap_or(i64::MAX / 2).saturating_add(1)
}

#[derive(Clone)]
pub struct Dispatcher {
    db: DatabaseConnection,
    transport: Arc<dyn NotificationTransport>,
    cfg: Dispatch,
}

impl Dispatcher {
    pub fn new(db: DatabaseConnection, transport: Arc<dyn NotificationTransport>, cfg: Dispatch) -> Self {
        Self { db, transport, cfg }
    }

    /// Deliver every pending/queued command whose `scheduled_at` has come.
    pub async fn dispatch_due(&self) -> Result<DispatchReport, TetherError> {
        use entities::command::{Column, Entity};

        let due = Entity::find()
            .filter(Column::Status.is_in([
                CommandStatus::Pending.as_str(),
                CommandStatus::Queued.as_str(),
            ]))
            .filter(Column::ScheduledAt.lte(storage::now()))
            .order_by_asc(Column::ScheduledAt)
            .limit(self.cfg.batch_size)
            .all(&self.db)
            .await?;

        self.dispatch_all(due).await
    }

    /// Close or retry commands whose window has lapsed.
    ///
    /// Undelivered (pending/queued) commands time out. Delivered (sent/executing)
    /// commands are re-dispatched while attempts remain and time out otherwise.
    pub async fn sweep_timeouts(&self) -> Result<DispatchReport, TetherError> {
        use entities::command::{Column, Entity};

        let now = storage::now();
        let mut report = DispatchReport::default();

        let undelivered = Entity::update_many()
            .col_expr(Column::Status, Expr::value(CommandStatus::Timeout.as_str()))
            .col_expr(
                Column::Error,
                Expr::value("command window lapsed before delivery"),
            )
            .col_expr(Column::CompletedAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Status.is_in([
                CommandStatus::Pending.as_str(),
                CommandStatus::Queued.as_str(),
            ]))
            .filter(Column::ExpiresAt.lte(now))
            // Skip commands leased by an in-flight attempt
            .filter(Column::ScheduledAt.lte(now))
            .exec(&self.db)
            .await?
            .rows_affected;
        report.timed_out += undelivered;

        let lapsed = Entity::find()
            .filter(Column::Status.is_in([
                CommandStatus::Sent.as_str(),
                CommandStatus::Executing.as_str(),
            ]))
            .filter(Column::ExpiresAt.lte(now))
            .order_by_asc(Column::ExpiresAt)
            .limit(self.cfg.batch_size)
            .all(&self.db)
            .await?;

        let mut retry = Vec::new();
        for command in lapsed {
            if command.attempt_count < command.max_attempts {
                retry.push(command);
                continue;
            }
            let status: CommandStatus = command.status.parse()?;
            if self
                .finish(&command, status, CommandStatus::Timeout, "no result reported before timeout")
                .await?
            {
                report.timed_out += 1;
            } else {
                report.skipped += 1;
            }
        }

        report.merge(self.dispatch_all(retry).await?);
        if report.processed() > 0 {
            tracing::info!(
                timed_out = report.timed_out,
                retried = report.sent + report.retrying,
                "Command timeout sweep"
            );
        }
        Ok(report)
    }

    /// Run dispatches concurrently, bounded by `max_concurrency`, so one hanging
    /// transport call cannot hold up other devices.
    async fn dispatch_all(
        &self,
        commands: Vec<entities::command::Model>,
    ) -> Result<DispatchReport, TetherError> {
        let mut report = DispatchReport::default();
        if commands.is_empty() {
            return Ok(report);
        }

        let permits = Arc::new(Semaphore::new(self.cfg.max_concurrency));
        let mut tasks = JoinSet::new();
        for command in commands {
            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| TetherError::Other(format!("dispatch semaphore closed: {e}")))?;
            let this = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let command_id = command.id.clone();
                (command_id, this.dispatch(command).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => report.record(outcome),
                Ok((command_id, Err(e))) => {
                    report.errors += 1;
                    tracing::error!(command_id, error = %e, "Dispatch failed");
                }
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(error = %e, "Dispatch task panicked");
                }
            }
        }
        Ok(report)
    }

    /// One delivery attempt for one command.
    ///
    /// The attempt is reserved with a guarded increment before the transport is called,
    /// so concurrent workers cannot exceed `max_attempts` between them.
    pub async fn dispatch(&self, command: entities::command::Model) -> Result<DispatchOutcome, TetherError> {
        use entities::command::{Column, Entity};

        let now = storage::now();
        let observed: CommandStatus = command.status.parse()?;
        if observed.is_terminal() {
            return Ok(DispatchOutcome::Skipped);
        }

        let undelivered = matches!(observed, CommandStatus::Pending | CommandStatus::Queued);
        if undelivered && command.expires_at <= now {
            let done = self
                .finish(&command, observed, CommandStatus::Timeout, "command window lapsed before delivery")
                .await?;
            return Ok(if done { DispatchOutcome::TimedOut } else { DispatchOutcome::Skipped });
        }

        if command.attempt_count >= command.max_attempts {
            let terminal = if undelivered { CommandStatus::Failed } else { CommandStatus::Timeout };
            let done = self
                .finish(&command, observed, terminal, "delivery attempts exhausted")
                .await?;
            return Ok(if done { terminal_outcome(terminal) } else { DispatchOutcome::Skipped });
        }

        let push_address = entities::Device::find()
            .filter(entities::device::Column::Id.eq(command.device_id.as_str()))
            .filter(entities::device::Column::OrganizationId.eq(command.organization_id.as_str()))
            .filter(entities::device::Column::DeletedAt.is_null())
            .one(&self.db)
            .await?
            .and_then(|d| d.push_address)
            .filter(|a| !a.trim().is_empty());

        let Some(push_address) = push_address else {
            // Nothing was attempted, so no attempt is consumed
            let done = self
                .finish(&command, observed, CommandStatus::Failed, NO_DELIVERY_CHANNEL)
                .await?;
            if done {
                tracing::warn!(command_id = %command.id, "Command failed: no delivery channel");
            }
            return Ok(if done { DispatchOutcome::Failed } else { DispatchOutcome::Skipped });
        };

        // The claim also leases the command for the length of one transport call:
        // undelivered commands by pushing `scheduled_at`, delivered ones by pushing
        // `expires_at`. Overlapping `dispatch_due`/`sweep_timeouts` runs skip it until
        // this attempt settles, or until the lease runs out after a crash.
        let reserved = if undelivered { CommandStatus::Queued } else { observed };
        let (lease_column, leased_until) = if undelivered {
            (Column::ScheduledAt, command.scheduled_at)
        } else {
            (Column::ExpiresAt, command.expires_at)
        };
        let claimed = Entity::update_many()
            .col_expr(Column::AttemptCount, Expr::col(Column::AttemptCount).add(1))
            .col_expr(Column::Status, Expr::value(reserved.as_str()))
            .col_expr(lease_column, Expr::value(now + lease_secs(&self.cfg)))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(command.id.as_str()))
            .filter(Column::Status.eq(observed.as_str()))
            .filter(Column::AttemptCount.eq(command.attempt_count))
            .filter(Column::AttemptCount.lt(command.max_attempts))
            .filter(lease_column.eq(leased_until))
            .filter(lease_column.lte(now))
            .exec(&self.db)
            .await?;
        if claimed.rows_affected == 0 {
            return Ok(DispatchOutcome::Skipped);
        }
        let attempt_number = command.attempt_count + 1;

        let attempt = entities::command_attempt::ActiveModel {
            command_id: Set(command.id.clone()),
            organization_id: Set(command.organization_id.clone()),
            attempt_number: Set(attempt_number),
            started_at: Set(now),
            finished_at: Set(None),
            outcome: Set("in_flight".to_string()),
            error: Set(None),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;

        let payload = serde_json::from_str(&command.payload)?;
        let envelope = CommandEnvelope {
            command_id: command.id.clone(),
            kind: CommandKind::from_parts(&command.command_type, Some(payload))?,
        };

        let limit = Duration::from_millis(self.cfg.transport_timeout_ms);
        let delivery = match tokio::time::timeout(limit, self.transport.deliver(&push_address, &envelope)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::TimedOut(limit)),
        };

        let finished_at = storage::now();
        let mut attempt: entities::command_attempt::ActiveModel = attempt.into();
        attempt.finished_at = Set(Some(finished_at));

        match delivery {
            Ok(receipt) => {
                attempt.outcome = Set("accepted".to_string());
                attempt.update(&self.db).await?;

                let sent_status = if reserved == CommandStatus::Queued {
                    CommandStatus::Sent
                } else {
                    reserved
                };
                let updated = Entity::update_many()
                    .col_expr(Column::Status, Expr::value(sent_status.as_str()))
                    .col_expr(Column::SentAt, Expr::value(finished_at))
                    .col_expr(Column::ExpiresAt, Expr::value(finished_at + command.timeout_secs))
                    .col_expr(Column::Error, Expr::value(Option::<String>::None))
                    .col_expr(Column::UpdatedAt, Expr::value(finished_at))
                    .filter(Column::Id.eq(command.id.as_str()))
                    .filter(Column::Status.eq(reserved.as_str()))
                    .exec(&self.db)
                    .await?;

                if updated.rows_affected == 0 {
                    // Cancelled or reported while the call was in flight
                    return Ok(DispatchOutcome::Skipped);
                }
                tracing::info!(
                    command_id = %command.id,
                    attempt = attempt_number,
                    message_id = receipt.message_id.as_deref().unwrap_or("-"),
                    "Command handed to transport"
                );
                Ok(DispatchOutcome::Sent)
            }
            Err(e) => {
                let error = e.to_string();
                attempt.outcome = Set("transport_failure".to_string());
                attempt.error = Set(Some(error.clone()));
                attempt.update(&self.db).await?;

                tracing::warn!(
                    command_id = %command.id,
                    attempt = attempt_number,
                    max_attempts = command.max_attempts,
                    error = %error,
                    "Transport failure"
                );

                if attempt_number >= command.max_attempts {
                    // Never delivered means failed; delivered but unanswered means timeout
                    let terminal = if reserved == CommandStatus::Queued {
                        CommandStatus::Failed
                    } else {
                        CommandStatus::Timeout
                    };
                    let done = self.finish_at(&command.id, reserved, terminal, &error, finished_at).await?;
                    return Ok(if done { terminal_outcome(terminal) } else { DispatchOutcome::Skipped });
                }

                let retry_at = finished_at + backoff_secs(&self.cfg, attempt_number);
                let retry_column = if reserved == CommandStatus::Queued {
                    Column::ScheduledAt
                } else {
                    Column::ExpiresAt
                };
                let updated = Entity::update_many()
                    .col_expr(retry_column, Expr::value(retry_at))
                    .col_expr(Column::Error, Expr::value(error))
                    .col_expr(Column::UpdatedAt, Expr::value(finished_at))
                    .filter(Column::Id.eq(command.id.as_str()))
                    .filter(Column::Status.eq(reserved.as_str()))
                    .exec(&self.db)
                    .await?;

                Ok(if updated.rows_affected > 0 {
                    DispatchOutcome::Retrying
                } else {
                    DispatchOutcome::Skipped
                })
            }
        }
    }

    async fn finish(
        &self,
        command: &entities::command::Model,
        from: CommandStatus,
        to: CommandStatus,
        error: &str,
    ) -> Result<bool, TetherError> {
        self.finish_at(&command.id, from, to, error, storage::now()).await
    }

    /// Guarded move to a terminal status. Returns whether this call made the change.
    async fn finish_at(
        &self,
        command_id: &str,
        from: CommandStatus,
        to: CommandStatus,
        error: &str,
        now: i64,
    ) -> Result<bool, TetherError> {
        use entities::command::{Column, Entity};

        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(to.as_str()))
            .col_expr(Column::Error, Expr::value(error.to_string()))
            .col_expr(Column::CompletedAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(command_id))
            .filter(Column::Status.eq(from.as_str()))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            tracing::info!(command_id, status = to.as_str(), error, "Command finished");
        }
        Ok(result.rows_affected > 0)
    }
}

fn terminal_outcome(status: CommandStatus) -> DispatchOutcome {
    match status {
        CommandStatus::Timeout => DispatchOutcome::TimedOut,
        _ => DispatchOutcome::Failed,
    }
}
