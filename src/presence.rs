//! Heartbeat ingestion and presence derivation.
//!
//! Presence is a function of the last heartbeat timestamp and the clock. The `status`
//! column on `devices` is only a cache for bulk listings and is never trusted on a
//! point read.

use crate::devices::{self, DeviceStatus};
use crate::entities;
use crate::errors::TetherError;
use crate::settings::Presence;
use crate::storage;
use crate::tenant::{Permission, TenantContext, TenantScoped};
use sea_orm::sea_query::{Condition, Expr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Presence at `now` for a device last heard from at `last_heartbeat_at`.
///
/// Maintenance is administrative and sticks regardless of heartbeats.
pub fn derive_status(
    now: i64,
    last_heartbeat_at: Option<i64>,
    stored: DeviceStatus,
    cfg: &Presence,
) -> DeviceStatus {
    if stored == DeviceStatus::Maintenance {
        return DeviceStatus::Maintenance;
    }
    let Some(last) = last_heartbeat_at else {
        return DeviceStatus::Offline;
    };
    let age = now.saturating_sub(last);
    if age <= cfg.freshness_window_secs {
        DeviceStatus::Online
    } else if age <= cfg.inactive_after_secs {
        DeviceStatus::Offline
    } else {
        DeviceStatus::Inactive
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<i64>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_meters: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Device clock at capture; clamped to the server clock. Defaults to receipt time.
    #[serde(default)]
    pub captured_at: Option<i64>,
    #[serde(default)]
    pub battery_level: Option<i64>,
    #[serde(default)]
    pub charging: Option<bool>,
    #[serde(default)]
    pub network_info: Option<NetworkInfo>,
    #[serde(default)]
    pub location: Option<Location>,
}

impl Telemetry {
    fn validate(&self) -> Result<(), TetherError> {
        if let Some(level) = self.battery_level {
            if !(0..=100).contains(&level) {
                return Err(TetherError::BadRequest(format!(
                    "battery_level must be between 0 and 100, got {level}"
                )));
            }
        }
        if let Some(loc) = self.location {
            if !(-90.0..=90.0).contains(&loc.latitude) || !(-180.0..=180.0).contains(&loc.longitude)
            {
                return Err(TetherError::BadRequest("location out of range".to_string()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    pub device_id: String,
    pub status: DeviceStatus,
    pub last_seen_at: Option<i64>,
    pub last_heartbeat_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSample {
    pub captured_at: i64,
    pub received_at: i64,
    pub battery_level: Option<i64>,
    pub charging: Option<bool>,
    pub network_info: Option<NetworkInfo>,
    pub location: Option<Location>,
}

impl TryFrom<entities::heartbeat::Model> for HeartbeatSample {
    type Error = TetherError;

    fn try_from(model: entities::heartbeat::Model) -> Result<Self, Self::Error> {
        let location = match (model.latitude, model.longitude) {
            (Some(latitude), Some(longitude)) => Some(Location {
                latitude,
                longitude,
                accuracy_meters: model.accuracy_meters,
            }),
            _ => None,
        };
        Ok(HeartbeatSample {
            captured_at: model.captured_at,
            received_at: model.received_at,
            battery_level: model.battery_level,
            charging: model.charging.map(|c| c != 0),
            network_info: model
                .network_info
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            location,
        })
    }
}

/// Ingest one heartbeat from a device and return its recomputed presence.
///
/// The sample and the device row move together in one transaction.
pub async fn record_heartbeat(
    db: &DatabaseConnection,
    scope: &impl TenantScoped,
    cfg: &Presence,
    device_id: &str,
    telemetry: Telemetry,
) -> Result<PresenceSnapshot, TetherError> {
    use entities::device::{Column, Entity};

    telemetry.validate()?;
    let organization_id = scope.organization_id();
    let txn = db.begin().await?;
    devices::find_active(&txn, organization_id, device_id)
        .await?
        .ok_or_else(|| TetherError::NotFound("device not found".to_string()))?;

    let now = storage::now();
    let captured_at = telemetry.captured_at.map_or(now, |t| t.min(now));

    entities::heartbeat::ActiveModel {
        device_id: Set(device_id.to_string()),
        organization_id: Set(organization_id.to_string()),
        captured_at: Set(captured_at),
        received_at: Set(now),
        battery_level: Set(telemetry.battery_level),
        charging: Set(telemetry.charging.map(i64::from)),
        network_info: Set(telemetry
            .network_info
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?),
        latitude: Set(telemetry.location.map(|l| l.latitude)),
        longitude: Set(telemetry.location.map(|l| l.longitude)),
        accuracy_meters: Set(telemetry.location.and_then(|l| l.accuracy_meters)),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    // Late or reordered samples must not move the clock backwards
    Entity::update_many()
        .col_expr(Column::LastHeartbeatAt, Expr::value(captured_at))
        .filter(Column::Id.eq(device_id))
        .filter(Column::OrganizationId.eq(organization_id))
        .filter(
            Condition::any()
                .add(Column::LastHeartbeatAt.is_null())
                .add(Column::LastHeartbeatAt.lt(captured_at)),
        )
        .exec(&txn)
        .await?;

    Entity::update_many()
        .col_expr(Column::LastSeenAt, Expr::value(now))
        .col_expr(Column::UpdatedAt, Expr::value(now))
        .filter(Column::Id.eq(device_id))
        .filter(Column::OrganizationId.eq(organization_id))
        .exec(&txn)
        .await?;

    let model = devices::find_active(&txn, organization_id, device_id)
        .await?
        .ok_or_else(|| TetherError::NotFound("device not found".to_string()))?;
    let stored: DeviceStatus = model.status.parse()?;
    let status = derive_status(now, model.last_heartbeat_at, stored, cfg);

    if status != stored {
        // Maintenance is only ever cleared by an operator
        Entity::update_many()
            .col_expr(Column::Status, Expr::value(status.as_str()))
            .filter(Column::Id.eq(device_id))
            .filter(Column::OrganizationId.eq(organization_id))
            .filter(Column::Status.ne(DeviceStatus::Maintenance.as_str()))
            .exec(&txn)
            .await?;
        tracing::info!(
            device_id,
            from = stored.as_str(),
            to = status.as_str(),
            "Device presence changed"
        );
    }

    txn.commit().await?;

    Ok(PresenceSnapshot {
        device_id: model.id,
        status,
        last_seen_at: model.last_seen_at,
        last_heartbeat_at: model.last_heartbeat_at,
    })
}

/// Pure read: presence recomputed from the heartbeat timestamp.
pub async fn get_status(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    cfg: &Presence,
    device_id: &str,
) -> Result<PresenceSnapshot, TetherError> {
    ctx.require(Permission::ViewDevices)?;
    let model = devices::find_active(db, ctx.organization_id(), device_id)
        .await?
        .ok_or_else(|| TetherError::NotFound("device not found".to_string()))?;

    let stored: DeviceStatus = model.status.parse()?;
    Ok(PresenceSnapshot {
        status: derive_status(storage::now(), model.last_heartbeat_at, stored, cfg),
        device_id: model.id,
        last_seen_at: model.last_seen_at,
        last_heartbeat_at: model.last_heartbeat_at,
    })
}

pub async fn recent_heartbeats(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    device_id: &str,
    limit: u64,
) -> Result<Vec<HeartbeatSample>, TetherError> {
    use entities::heartbeat::{Column, Entity};

    ctx.require(Permission::ViewDevices)?;
    devices::find_any(db, ctx.organization_id(), device_id)
        .await?
        .ok_or_else(|| TetherError::NotFound("device not found".to_string()))?;

    Entity::find()
        .filter(Column::DeviceId.eq(device_id))
        .filter(Column::OrganizationId.eq(ctx.organization_id()))
        .order_by_desc(Column::CapturedAt)
        .limit(limit)
        .all(db)
        .await?
        .into_iter()
        .map(HeartbeatSample::try_from)
        .collect()
}

/// Refresh the cached status column of silent devices. Point reads do not depend on it.
pub async fn sweep_stale_presence(db: &DatabaseConnection, cfg: &Presence) -> Result<u64, TetherError> {
    use entities::device::{Column, Entity};

    let now = storage::now();
    let inactive_before = now - cfg.inactive_after_secs;
    let offline_before = now - cfg.freshness_window_secs;

    let inactive = Entity::update_many()
        .col_expr(Column::Status, Expr::value(DeviceStatus::Inactive.as_str()))
        .col_expr(Column::UpdatedAt, Expr::value(now))
        .filter(Column::DeletedAt.is_null())
        .filter(Column::Status.is_in([
            DeviceStatus::Online.as_str(),
            DeviceStatus::Offline.as_str(),
        ]))
        .filter(Column::LastHeartbeatAt.lt(inactive_before))
        .exec(db)
        .await?
        .rows_affected;

    let offline = Entity::update_many()
        .col_expr(Column::Status, Expr::value(DeviceStatus::Offline.as_str()))
        .col_expr(Column::UpdatedAt, Expr::value(now))
        .filter(Column::DeletedAt.is_null())
        .filter(Column::Status.eq(DeviceStatus::Online.as_str()))
        .filter(
            Condition::any()
                .add(Column::LastHeartbeatAt.is_null())
                .add(Column::LastHeartbeatAt.lt(offline_before)),
        )
        .exec(db)
        .await?
        .rows_affected;

    if inactive + offline > 0 {
        tracing::info!(offline, inactive, "Swept stale device presence");
    }
    Ok(inactive + offline)
}

/// Drop heartbeat samples received before the retention horizon.
pub async fn prune_heartbeats(db: &DatabaseConnection, cfg: &Presence) -> Result<u64, TetherError> {
    use entities::heartbeat::{Column, Entity};

    let cutoff = storage::now() - cfg.heartbeat_retention_secs;
    let result = Entity::delete_many()
        .filter(Column::ReceivedAt.lt(cutoff))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_status_thresholds() {
        let cfg = Presence::default();
        let now = 1_000_000;

        assert_eq!(derive_status(now, None, DeviceStatus::Online, &cfg), DeviceStatus::Offline);
        assert_eq!(
            derive_status(now, Some(now), DeviceStatus::Offline, &cfg),
            DeviceStatus::Online
        );
        assert_eq!(
            derive_status(now, Some(now - cfg.freshness_window_secs), DeviceStatus::Offline, &cfg),
            DeviceStatus::Online
        );
        assert_eq!(
            derive_status(
                now,
                Some(now - cfg.freshness_window_secs - 1),
                DeviceStatus::Online,
                &cfg
            ),
            DeviceStatus::Offline
        );
        assert_eq!(
            derive_status(
                now,
                Some(now - cfg.inactive_after_secs - 1),
                DeviceStatus::Online,
                &cfg
            ),
            DeviceStatus::Inactive
        );
    }

    #[test]
    fn test_maintenance_is_sticky() {
        let cfg = Presence::default();
        assert_eq!(
            derive_status(50, Some(50), DeviceStatus::Maintenance, &cfg),
            DeviceStatus::Maintenance
        );
        assert_eq!(
            derive_status(50, None, DeviceStatus::Maintenance, &cfg),
            DeviceStatus::Maintenance
        );
    }

    #[test]
    fn test_telemetry_validation() {
        let mut telemetry = Telemetry {
            battery_level: Some(101),
            ..Default::default()
        };
        assert!(telemetry.validate().is_err());

        telemetry.battery_level = Some(42);
        telemetry.location = Some(Location {
            latitude: 91.0,
            longitude: 0.0,
            accuracy_meters: None,
        });
        assert!(telemetry.validate().is_err());

        telemetry.location = Some(Location {
            latitude: 52.52,
            longitude: 13.40,
            accuracy_meters: Some(12.5),
        });
        assert!(telemetry.validate().is_ok());
    }

    #[test]
    fn test_network_info_keeps_unknown_fields() {
        let info: NetworkInfo =
            serde_json::from_str(r#"{"type":"wifi","ssid":"office","signal_strength":-61}"#)
                .unwrap();
        assert_eq!(info.kind.as_deref(), Some("wifi"));
        assert_eq!(info.signal_strength, Some(-61));
        assert_eq!(info.extras["ssid"], "office");
    }
}
