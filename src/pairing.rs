//! Pairing codes and device registrations.
//!
//! An operator issues a code, which creates a pending registration slot. The device
//! redeems the code by submitting its descriptor, and an operator then approves (which
//! provisions the device) or rejects it. Expiry is never stored as the source of truth;
//! it is recomputed from `expires_at` on every read.

use crate::devices::{self, Device, NewDevice};
use crate::entities;
use crate::errors::TetherError;
use crate::settings::{Pairing, Presence};
use crate::storage;
use crate::tenant::{Permission, TenantContext, TenantScoped};
use rand::Rng;
use sea_orm::sea_query::{Condition, Expr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

/// Unambiguous when read aloud or typed: no 0/O, 1/I/L.
const CODE_ALPHABET: &[u8] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Pending => "pending",
            RegistrationStatus::Approved => "approved",
            RegistrationStatus::Rejected => "rejected",
            RegistrationStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RegistrationStatus::Approved | RegistrationStatus::Rejected)
    }
}

impl FromStr for RegistrationStatus {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RegistrationStatus::Pending),
            "approved" => Ok(RegistrationStatus::Approved),
            "rejected" => Ok(RegistrationStatus::Rejected),
            "expired" => Ok(RegistrationStatus::Expired),
            other => Err(TetherError::BadRequest(format!(
                "unknown registration status: {other}"
            ))),
        }
    }
}

/// Status as observed at `now`: a pending registration past its expiry is expired.
pub fn effective_status(now: i64, expires_at: i64, stored: RegistrationStatus) -> RegistrationStatus {
    match stored {
        RegistrationStatus::Pending if now >= expires_at => RegistrationStatus::Expired,
        other => other,
    }
}

/// What a device reports about itself when redeeming a code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_token: Option<String>,
    /// Agent-specific fields kept verbatim
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl DeviceDescriptor {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            manufacturer: None,
            os_version: None,
            hardware_id: None,
            push_token: None,
            extras: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub id: String,
    pub organization_id: String,
    pub pairing_code: String,
    pub description: Option<String>,
    pub descriptor: Option<DeviceDescriptor>,
    pub status: RegistrationStatus,
    pub issued_by: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub submitted_at: Option<i64>,
    pub approved_by: Option<String>,
    pub approved_at: Option<i64>,
    pub rejected_by: Option<String>,
    pub rejected_at: Option<i64>,
    pub rejection_reason: Option<String>,
    pub device_id: Option<String>,
}

impl Registration {
    fn from_model(model: entities::device_registration::Model, now: i64) -> Result<Self, TetherError> {
        let stored: RegistrationStatus = model.status.parse()?;
        Ok(Registration {
            status: effective_status(now, model.expires_at, stored),
            descriptor: model
                .descriptor
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            id: model.id,
            organization_id: model.organization_id,
            pairing_code: model.pairing_code,
            description: model.description,
            issued_by: model.issued_by,
            created_at: model.created_at,
            expires_at: model.expires_at,
            submitted_at: model.submitted_at,
            approved_by: model.approved_by,
            approved_at: model.approved_at,
            rejected_by: model.rejected_by,
            rejected_at: model.rejected_at,
            rejection_reason: model.rejection_reason,
            device_id: model.device_id,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedCode {
    pub registration_id: String,
    pub pairing_code: String,
    pub expires_at: i64,
}

/// Returned to the device on a successful redemption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub registration_id: String,
    pub organization_id: String,
    pub expires_at: i64,
}

/// What a device polling its own registration may learn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingState {
    pub registration_id: String,
    pub organization_id: String,
    pub status: RegistrationStatus,
    pub device_id: Option<String>,
}

pub fn generate_pairing_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Canonical form used for storage and lookup: uppercase, separators dropped.
pub fn normalize_code(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

async fn code_in_use<C: ConnectionTrait>(conn: &C, code: &str, now: i64) -> Result<bool, TetherError> {
    use entities::device_registration::{Column, Entity};

    // Codes are a global lookup key, so the check spans every organization
    let count = Entity::find()
        .filter(Column::LiveCode.eq(code))
        .filter(Column::ExpiresAt.gt(now))
        .count(conn)
        .await?;
    Ok(count > 0)
}

/// Free `code` from registrations that lapsed before the expiry sweep reached them.
async fn release_lapsed_code<C: ConnectionTrait>(conn: &C, code: &str, now: i64) -> Result<u64, TetherError> {
    use entities::device_registration::{Column, Entity};

    let result = Entity::update_many()
        .col_expr(Column::Status, Expr::value(RegistrationStatus::Expired.as_str()))
        .col_expr(Column::LiveCode, Expr::value(Option::<String>::None))
        .filter(Column::LiveCode.eq(code))
        .filter(Column::ExpiresAt.lte(now))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// Take the organization row lock for the rest of the transaction. Quota checks
/// that count devices run under it, so concurrent issuers and approvers of one
/// organization queue up.
async fn lock_organization<C: ConnectionTrait>(conn: &C, organization_id: &str) -> Result<(), TetherError> {
    entities::Organization::find_by_id(organization_id.to_string())
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| TetherError::NotFound("organization not found".to_string()))?;
    Ok(())
}

async fn ensure_device_capacity<C: ConnectionTrait>(conn: &C, ctx: &TenantContext) -> Result<(), TetherError> {
    let active = devices::count_active(conn, ctx.organization_id()).await?;
    if active >= ctx.organization.max_devices {
        return Err(TetherError::LimitExceeded(format!(
            "organization already has {active} of {} devices",
            ctx.organization.max_devices
        )));
    }
    Ok(())
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn checked_validity(cfg: &Pairing, validity_secs: Option<i64>) -> Result<i64, TetherError> {
    let validity = validity_secs.unwrap_or(cfg.default_validity_secs);
    if validity <= 0 || validity > cfg.max_validity_secs {
        return Err(TetherError::BadRequest(format!(
            "validity must be between 1 and {} seconds",
            cfg.max_validity_secs
        )));
    }
    Ok(validity)
}

/// Issue a fresh pairing code for the caller's organization.
pub async fn issue_code(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    cfg: &Pairing,
    description: Option<String>,
    validity_secs: Option<i64>,
) -> Result<IssuedCode, TetherError> {
    ctx.require(Permission::ManagePairing)?;
    let validity = checked_validity(cfg, validity_secs)?;

    for _ in 0..cfg.max_issue_attempts {
        let code = generate_pairing_code(cfg.code_length);
        if let Some(issued) = try_issue(db, ctx, &code, description.clone(), validity).await? {
            return Ok(issued);
        }
        tracing::debug!("Pairing code collision, retrying");
    }

    Err(TetherError::Conflict(
        "could not allocate a unique pairing code".to_string(),
    ))
}

/// Issue a code chosen by the operator, e.g. one printed on a setup sheet.
/// Refused with `Conflict` while another live registration holds it; expired and
/// settled registrations do not.
pub async fn issue_preset_code(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    cfg: &Pairing,
    code: &str,
    description: Option<String>,
    validity_secs: Option<i64>,
) -> Result<IssuedCode, TetherError> {
    ctx.require(Permission::ManagePairing)?;
    let validity = checked_validity(cfg, validity_secs)?;

    let code = normalize_code(code);
    if code.len() != cfg.code_length || !code.bytes().all(|b| CODE_ALPHABET.contains(&b)) {
        return Err(TetherError::BadRequest(format!(
            "pairing code must be {} characters from {}",
            cfg.code_length,
            String::from_utf8_lossy(CODE_ALPHABET)
        )));
    }

    try_issue(db, ctx, &code, description, validity)
        .await?
        .ok_or_else(|| TetherError::Conflict("pairing code is in use".to_string()))
}

/// One issuance attempt. `None` means another live registration holds `code`.
///
/// The collision check is a fast path; the unique index on `live_code` is what
/// makes two racing issuers of one code mutually exclusive.
async fn try_issue(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    code: &str,
    description: Option<String>,
    validity: i64,
) -> Result<Option<IssuedCode>, TetherError> {
    let txn = db.begin().await?;
    lock_organization(&txn, ctx.organization_id()).await?;
    if let Err(e) = ensure_device_capacity(&txn, ctx).await {
        txn.rollback().await?;
        return Err(e);
    }

    let now = storage::now();
    release_lapsed_code(&txn, code, now).await?;
    if code_in_use(&txn, code, now).await? {
        txn.rollback().await?;
        return Ok(None);
    }

    let id = storage::random_id();
    let expires_at = now + validity;
    let inserted = entities::device_registration::ActiveModel {
        id: Set(id.clone()),
        organization_id: Set(ctx.organization_id().to_string()),
        pairing_code: Set(code.to_string()),
        description: Set(description),
        descriptor: Set(None),
        status: Set(RegistrationStatus::Pending.as_str().to_string()),
        issued_by: Set(ctx.subject.clone()),
        created_at: Set(now),
        expires_at: Set(expires_at),
        submitted_at: Set(None),
        approved_by: Set(None),
        approved_at: Set(None),
        rejected_by: Set(None),
        rejected_at: Set(None),
        rejection_reason: Set(None),
        device_id: Set(None),
        live_code: Set(Some(code.to_string())),
    }
    .insert(&txn)
    .await;

    match inserted {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            txn.rollback().await?;
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    }
    txn.commit().await?;

    tracing::info!(
        registration_id = %id,
        organization_id = ctx.organization_id(),
        expires_at,
        "Issued pairing code"
    );
    Ok(Some(IssuedCode {
        registration_id: id,
        pairing_code: code.to_string(),
        expires_at,
    }))
}

/// Redeem a pairing code from the device side. Possession of the code is the only
/// credential, so failures never reveal which organization a code belongs to.
pub async fn submit_registration(
    db: &DatabaseConnection,
    code: &str,
    descriptor: DeviceDescriptor,
) -> Result<Submission, TetherError> {
    use entities::device_registration::{Column, Entity};

    let code = normalize_code(code);
    if code.is_empty() {
        return Err(TetherError::NotFound("unknown pairing code".to_string()));
    }
    if descriptor.model.trim().is_empty() {
        return Err(TetherError::BadRequest("device model is required".to_string()));
    }

    let now = storage::now();
    let slot = Entity::find()
        .filter(Column::PairingCode.eq(code.as_str()))
        .filter(Column::Status.is_in([
            RegistrationStatus::Pending.as_str(),
            RegistrationStatus::Expired.as_str(),
        ]))
        .order_by_desc(Column::ExpiresAt)
        .one(db)
        .await?
        .ok_or_else(|| TetherError::NotFound("unknown pairing code".to_string()))?;

    let stored: RegistrationStatus = slot.status.parse()?;
    if effective_status(now, slot.expires_at, stored) == RegistrationStatus::Expired {
        return Err(TetherError::Expired("pairing code has expired".to_string()));
    }
    if slot.submitted_at.is_some() {
        return Err(TetherError::Conflict(
            "pairing code has already been redeemed".to_string(),
        ));
    }

    let result = Entity::update_many()
        .col_expr(Column::Descriptor, Expr::value(serde_json::to_string(&descriptor)?))
        .col_expr(Column::SubmittedAt, Expr::value(now))
        .filter(Column::Id.eq(slot.id.as_str()))
        .filter(Column::Status.eq(RegistrationStatus::Pending.as_str()))
        .filter(Column::SubmittedAt.is_null())
        .filter(Column::ExpiresAt.gt(now))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(TetherError::Conflict(
            "pairing code has already been redeemed".to_string(),
        ));
    }

    tracing::info!(
        registration_id = %slot.id,
        model = %descriptor.model,
        "Registration submitted"
    );
    Ok(Submission {
        registration_id: slot.id,
        organization_id: slot.organization_id,
        expires_at: slot.expires_at,
    })
}

/// Device-side poll after submission. The registration id is unguessable and is only
/// handed out to the device that redeemed the code.
pub async fn pairing_state(
    db: &DatabaseConnection,
    registration_id: &str,
) -> Result<PairingState, TetherError> {
    let model = entities::DeviceRegistration::find_by_id(registration_id.to_string())
        .one(db)
        .await?
        .filter(|m| m.submitted_at.is_some())
        .ok_or_else(|| TetherError::NotFound("registration not found".to_string()))?;

    let stored: RegistrationStatus = model.status.parse()?;
    Ok(PairingState {
        status: effective_status(storage::now(), model.expires_at, stored),
        registration_id: model.id,
        organization_id: model.organization_id,
        device_id: model.device_id,
    })
}

/// Explain why a guarded transition on `registration_id` matched no row.
async fn classify_refusal<C: ConnectionTrait>(
    conn: &C,
    organization_id: &str,
    registration_id: &str,
    now: i64,
) -> Result<TetherError, TetherError> {
    use entities::device_registration::{Column, Entity};

    let Some(model) = Entity::find()
        .filter(Column::Id.eq(registration_id))
        .filter(Column::OrganizationId.eq(organization_id))
        .one(conn)
        .await?
    else {
        return Ok(TetherError::NotFound("registration not found".to_string()));
    };

    let stored: RegistrationStatus = model.status.parse()?;
    Ok(match effective_status(now, model.expires_at, stored) {
        RegistrationStatus::Expired => TetherError::Expired("registration has expired".to_string()),
        RegistrationStatus::Pending if model.submitted_at.is_none() => TetherError::Conflict(
            "no device has redeemed this pairing code yet".to_string(),
        ),
        status => TetherError::Conflict(format!("registration is already {}", status.as_str())),
    })
}

/// Approve a submitted registration and provision its device.
///
/// The status guard, quota check and device insert share one transaction; of several
/// concurrent approvals exactly one matches the guarded update. The organization row
/// lock keeps approvals of different registrations from overrunning the quota.
pub async fn approve(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    presence: &Presence,
    registration_id: &str,
) -> Result<Device, TetherError> {
    use entities::device_registration::{Column, Entity};

    ctx.require(Permission::ManagePairing)?;
    let organization_id = ctx.organization_id();
    let now = storage::now();
    let device_id = storage::random_id();

    let txn = db.begin().await?;
    lock_organization(&txn, organization_id).await?;

    let result = Entity::update_many()
        .col_expr(Column::Status, Expr::value(RegistrationStatus::Approved.as_str()))
        .col_expr(Column::LiveCode, Expr::value(Option::<String>::None))
        .col_expr(Column::ApprovedBy, Expr::value(ctx.subject.clone()))
        .col_expr(Column::ApprovedAt, Expr::value(now))
        .col_expr(Column::DeviceId, Expr::value(device_id.clone()))
        .filter(Column::Id.eq(registration_id))
        .filter(Column::OrganizationId.eq(organization_id))
        .filter(Column::Status.eq(RegistrationStatus::Pending.as_str()))
        .filter(Column::ExpiresAt.gt(now))
        .filter(Column::SubmittedAt.is_not_null())
        .exec(&txn)
        .await?;

    if result.rows_affected == 0 {
        let err = classify_refusal(&txn, organization_id, registration_id, now).await?;
        txn.rollback().await?;
        return Err(err);
    }

    if let Err(e) = ensure_device_capacity(&txn, ctx).await {
        txn.rollback().await?;
        return Err(e);
    }

    let registration = Entity::find_by_id(registration_id.to_string())
        .one(&txn)
        .await?
        .ok_or_else(|| TetherError::NotFound("registration not found".to_string()))?;
    let descriptor: DeviceDescriptor = registration
        .descriptor
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?
        .ok_or_else(|| TetherError::Other("approved registration has no descriptor".to_string()))?;

    let display_name = registration
        .description
        .clone()
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| match &descriptor.manufacturer {
            Some(maker) => format!("{maker} {}", descriptor.model),
            None => descriptor.model.clone(),
        });

    let device = devices::insert_device(
        &txn,
        device_id,
        NewDevice {
            organization_id: organization_id.to_string(),
            display_name,
            push_address: descriptor.push_token.clone(),
            model: Some(descriptor.model.clone()),
            os_version: descriptor.os_version.clone(),
            hardware_id: descriptor.hardware_id.clone(),
            registration_id: Some(registration.id.clone()),
        },
    )
    .await?;

    txn.commit().await?;

    tracing::info!(
        registration_id,
        device_id = %device.id,
        approved_by = %ctx.subject,
        "Registration approved, device provisioned"
    );
    Device::from_model(device, now, presence)
}

/// Reject a pending registration. Works before or after the device has redeemed the
/// code, so it doubles as revoking an unused code.
pub async fn reject(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    registration_id: &str,
    reason: Option<String>,
) -> Result<Registration, TetherError> {
    use entities::device_registration::{Column, Entity};

    ctx.require(Permission::ManagePairing)?;
    let organization_id = ctx.organization_id();
    let now = storage::now();

    let result = Entity::update_many()
        .col_expr(Column::Status, Expr::value(RegistrationStatus::Rejected.as_str()))
        .col_expr(Column::LiveCode, Expr::value(Option::<String>::None))
        .col_expr(Column::RejectedBy, Expr::value(ctx.subject.clone()))
        .col_expr(Column::RejectedAt, Expr::value(now))
        .col_expr(Column::RejectionReason, Expr::value(reason))
        .filter(Column::Id.eq(registration_id))
        .filter(Column::OrganizationId.eq(organization_id))
        .filter(Column::Status.eq(RegistrationStatus::Pending.as_str()))
        .filter(Column::ExpiresAt.gt(now))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(classify_refusal(db, organization_id, registration_id, now).await?);
    }

    tracing::info!(registration_id, rejected_by = %ctx.subject, "Registration rejected");
    get_registration(db, ctx, registration_id).await
}

pub async fn get_registration(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    registration_id: &str,
) -> Result<Registration, TetherError> {
    use entities::device_registration::{Column, Entity};

    ctx.require(Permission::ViewDevices)?;
    let model = Entity::find()
        .filter(Column::Id.eq(registration_id))
        .filter(Column::OrganizationId.eq(ctx.organization_id()))
        .one(db)
        .await?
        .ok_or_else(|| TetherError::NotFound("registration not found".to_string()))?;
    Registration::from_model(model, storage::now())
}

/// List the organization's registrations, newest first, optionally filtered by the
/// status as observed now.
pub async fn list_registrations(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    status: Option<RegistrationStatus>,
) -> Result<Vec<Registration>, TetherError> {
    use entities::device_registration::{Column, Entity};

    ctx.require(Permission::ViewDevices)?;
    let now = storage::now();

    let mut query = Entity::find().filter(Column::OrganizationId.eq(ctx.organization_id()));
    query = match status {
        None => query,
        Some(RegistrationStatus::Pending) => query
            .filter(Column::Status.eq(RegistrationStatus::Pending.as_str()))
            .filter(Column::ExpiresAt.gt(now)),
        Some(RegistrationStatus::Expired) => query.filter(
            Condition::any()
                .add(Column::Status.eq(RegistrationStatus::Expired.as_str()))
                .add(
                    Condition::all()
                        .add(Column::Status.eq(RegistrationStatus::Pending.as_str()))
                        .add(Column::ExpiresAt.lte(now)),
                ),
        ),
        Some(terminal) => query.filter(Column::Status.eq(terminal.as_str())),
    };

    query
        .order_by_desc(Column::CreatedAt)
        .all(db)
        .await?
        .into_iter()
        .map(|model| Registration::from_model(model, now))
        .collect()
}

/// Persist derived expiry so bulk queries and indexes see it.
pub async fn expire_stale_registrations(db: &DatabaseConnection) -> Result<u64, TetherError> {
    use entities::device_registration::{Column, Entity};

    let result = Entity::update_many()
        .col_expr(Column::Status, Expr::value(RegistrationStatus::Expired.as_str()))
        .col_expr(Column::LiveCode, Expr::value(Option::<String>::None))
        .filter(Column::Status.eq(RegistrationStatus::Pending.as_str()))
        .filter(Column::ExpiresAt.lte(storage::now()))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_codes_use_alphabet() {
        for _ in 0..100 {
            let code = generate_pairing_code(6);
            assert_eq!(code.len(), 6);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("7f3k2q"), "7F3K2Q");
        assert_eq!(normalize_code(" 7F3-K2Q "), "7F3K2Q");
        assert_eq!(normalize_code("7f3 k2q"), "7F3K2Q");
        assert_eq!(normalize_code("  "), "");
    }

    #[test]
    fn test_effective_status() {
        use RegistrationStatus::*;
        assert_eq!(effective_status(99, 100, Pending), Pending);
        assert_eq!(effective_status(100, 100, Pending), Expired);
        assert_eq!(effective_status(500, 100, Approved), Approved);
        assert_eq!(effective_status(500, 100, Rejected), Rejected);
    }

    #[test]
    fn test_descriptor_keeps_extras() {
        let descriptor: DeviceDescriptor = serde_json::from_str(
            r#"{"model":"Pixel 7","os_version":"14","imei":"356938035643809","sdk_int":34}"#,
        )
        .unwrap();
        assert_eq!(descriptor.model, "Pixel 7");
        assert_eq!(descriptor.os_version.as_deref(), Some("14"));
        assert_eq!(descriptor.extras["imei"], "356938035643809");
        assert_eq!(descriptor.extras["sdk_int"], 34);

        let round = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(round["imei"], "356938035643809");
        assert!(round.get("push_token").is_none());
    }
}
