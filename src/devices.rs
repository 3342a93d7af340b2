//! Provisioned devices.
//!
//! Rows are created only by pairing approval. The stored `status` column is a cache;
//! every read goes through [`presence::derive_status`].

use crate::entities;
use crate::errors::TetherError;
use crate::presence;
use crate::settings::Presence;
use crate::storage;
use crate::tenant::{Permission, TenantContext, TenantScoped};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Offline,
    Inactive,
    Maintenance,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Inactive => "inactive",
            DeviceStatus::Maintenance => "maintenance",
        }
    }
}

impl FromStr for DeviceStatus {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(DeviceStatus::Online),
            "offline" => Ok(DeviceStatus::Offline),
            "inactive" => Ok(DeviceStatus::Inactive),
            "maintenance" => Ok(DeviceStatus::Maintenance),
            other => Err(TetherError::Other(format!("unknown device status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub organization_id: String,
    pub display_name: String,
    pub status: DeviceStatus,
    pub push_address: Option<String>,
    pub last_seen_at: Option<i64>,
    pub last_heartbeat_at: Option<i64>,
    pub model: Option<String>,
    pub os_version: Option<String>,
    pub hardware_id: Option<String>,
    pub owner_metadata: Option<Value>,
    pub registration_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl Device {
    /// Build the API view, recomputing presence at `now`.
    pub fn from_model(
        model: entities::device::Model,
        now: i64,
        presence: &Presence,
    ) -> Result<Self, TetherError> {
        let stored: DeviceStatus = model.status.parse()?;
        let owner_metadata = model
            .owner_metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Device {
            status: presence::derive_status(now, model.last_heartbeat_at, stored, presence),
            id: model.id,
            organization_id: model.organization_id,
            display_name: model.display_name,
            push_address: model.push_address,
            last_seen_at: model.last_seen_at,
            last_heartbeat_at: model.last_heartbeat_at,
            model: model.model,
            os_version: model.os_version,
            hardware_id: model.hardware_id,
            owner_metadata,
            registration_id: model.registration_id,
            created_at: model.created_at,
            updated_at: model.updated_at,
            deleted_at: model.deleted_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewDevice {
    pub organization_id: String,
    pub display_name: String,
    pub push_address: Option<String>,
    pub model: Option<String>,
    pub os_version: Option<String>,
    pub hardware_id: Option<String>,
    pub registration_id: Option<String>,
}

/// Administrative edit. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceUpdate {
    pub display_name: Option<String>,
    pub owner_metadata: Option<Value>,
}

pub(crate) async fn insert_device<C: ConnectionTrait>(
    conn: &C,
    id: String,
    input: NewDevice,
) -> Result<entities::device::Model, TetherError> {
    let now = storage::now();
    let model = entities::device::ActiveModel {
        id: Set(id),
        organization_id: Set(input.organization_id),
        display_name: Set(input.display_name),
        status: Set(DeviceStatus::Offline.as_str().to_string()),
        push_address: Set(input.push_address),
        last_seen_at: Set(None),
        last_heartbeat_at: Set(None),
        model: Set(input.model),
        os_version: Set(input.os_version),
        hardware_id: Set(input.hardware_id),
        owner_metadata: Set(None),
        registration_id: Set(input.registration_id),
        created_at: Set(now),
        updated_at: Set(now),
        deleted_at: Set(None),
    };
    Ok(model.insert(conn).await?)
}

/// Devices counting against the plan limit. Retired devices are excluded.
pub(crate) async fn count_active<C: ConnectionTrait>(
    conn: &C,
    organization_id: &str,
) -> Result<i64, TetherError> {
    use entities::device::{Column, Entity};

    let count = Entity::find()
        .filter(Column::OrganizationId.eq(organization_id))
        .filter(Column::DeletedAt.is_null())
        .count(conn)
        .await?;
    Ok(count as i64)
}

/// Organization-scoped lookup of a device that has not been retired.
pub(crate) async fn find_active<C: ConnectionTrait>(
    conn: &C,
    organization_id: &str,
    device_id: &str,
) -> Result<Option<entities::device::Model>, TetherError> {
    use entities::device::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::Id.eq(device_id))
        .filter(Column::OrganizationId.eq(organization_id))
        .filter(Column::DeletedAt.is_null())
        .one(conn)
        .await?)
}

/// Like [`find_active`] but includes retired devices, for history reads.
pub(crate) async fn find_any<C: ConnectionTrait>(
    conn: &C,
    organization_id: &str,
    device_id: &str,
) -> Result<Option<entities::device::Model>, TetherError> {
    use entities::device::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::Id.eq(device_id))
        .filter(Column::OrganizationId.eq(organization_id))
        .one(conn)
        .await?)
}

fn not_found() -> TetherError {
    TetherError::NotFound("device not found".to_string())
}

pub async fn get_device(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    presence: &Presence,
    device_id: &str,
) -> Result<Device, TetherError> {
    ctx.require(Permission::ViewDevices)?;
    let model = find_active(db, ctx.organization_id(), device_id)
        .await?
        .ok_or_else(not_found)?;
    Device::from_model(model, storage::now(), presence)
}

pub async fn list_devices(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    presence: &Presence,
) -> Result<Vec<Device>, TetherError> {
    use entities::device::{Column, Entity};

    ctx.require(Permission::ViewDevices)?;
    let now = storage::now();
    Entity::find()
        .filter(Column::OrganizationId.eq(ctx.organization_id()))
        .filter(Column::DeletedAt.is_null())
        .order_by_asc(Column::DisplayName)
        .all(db)
        .await?
        .into_iter()
        .map(|model| Device::from_model(model, now, presence))
        .collect()
}

pub async fn update_device(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    presence: &Presence,
    device_id: &str,
    update: DeviceUpdate,
) -> Result<Device, TetherError> {
    ctx.require(Permission::ManageDevices)?;
    let model = find_active(db, ctx.organization_id(), device_id)
        .await?
        .ok_or_else(not_found)?;

    let mut active: entities::device::ActiveModel = model.into();
    if let Some(name) = update.display_name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(TetherError::BadRequest("display name must not be empty".to_string()));
        }
        active.display_name = Set(name);
    }
    if let Some(metadata) = update.owner_metadata {
        if !metadata.is_object() {
            return Err(TetherError::BadRequest(
                "owner metadata must be a JSON object".to_string(),
            ));
        }
        active.owner_metadata = Set(Some(serde_json::to_string(&metadata)?));
    }
    active.updated_at = Set(storage::now());
    let model = active.update(db).await?;

    Device::from_model(model, storage::now(), presence)
}

/// Toggle maintenance. Leaving maintenance writes back the heartbeat-derived status.
pub async fn set_maintenance(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    presence: &Presence,
    device_id: &str,
    enabled: bool,
) -> Result<Device, TetherError> {
    ctx.require(Permission::ManageDevices)?;
    let model = find_active(db, ctx.organization_id(), device_id)
        .await?
        .ok_or_else(not_found)?;

    let now = storage::now();
    let status = if enabled {
        DeviceStatus::Maintenance
    } else {
        presence::derive_status(now, model.last_heartbeat_at, DeviceStatus::Offline, presence)
    };

    let mut active: entities::device::ActiveModel = model.into();
    active.status = Set(status.as_str().to_string());
    active.updated_at = Set(now);
    let model = active.update(db).await?;

    tracing::info!(device_id, maintenance = enabled, "Device maintenance changed");
    Device::from_model(model, now, presence)
}

/// Soft delete. History rows keep pointing at the device.
pub async fn retire_device(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    device_id: &str,
) -> Result<(), TetherError> {
    use entities::device::{Column, Entity};

    ctx.require(Permission::ManageDevices)?;
    let now = storage::now();
    let result = Entity::update_many()
        .col_expr(Column::DeletedAt, Expr::value(now))
        .col_expr(Column::PushAddress, Expr::value(Option::<String>::None))
        .col_expr(Column::UpdatedAt, Expr::value(now))
        .filter(Column::Id.eq(device_id))
        .filter(Column::OrganizationId.eq(ctx.organization_id()))
        .filter(Column::DeletedAt.is_null())
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(not_found());
    }
    tracing::info!(device_id, organization_id = ctx.organization_id(), "Device retired");
    Ok(())
}

/// Device-originated rotation of the push token.
pub async fn update_push_address(
    db: &DatabaseConnection,
    scope: &impl TenantScoped,
    device_id: &str,
    push_address: &str,
) -> Result<(), TetherError> {
    use entities::device::{Column, Entity};

    let push_address = push_address.trim();
    if push_address.is_empty() {
        return Err(TetherError::BadRequest("push token must not be empty".to_string()));
    }

    let result = Entity::update_many()
        .col_expr(Column::PushAddress, Expr::value(push_address.to_string()))
        .col_expr(Column::UpdatedAt, Expr::value(storage::now()))
        .filter(Column::Id.eq(device_id))
        .filter(Column::OrganizationId.eq(scope.organization_id()))
        .filter(Column::DeletedAt.is_null())
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(not_found());
    }
    tracing::debug!(device_id, "Push address rotated");
    Ok(())
}
