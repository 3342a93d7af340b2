use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Append-only telemetry sample.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "heartbeats")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = true)]
    pub id: i64,
    pub device_id: String,
    pub organization_id: String,
    pub captured_at: i64,
    pub received_at: i64,
    pub battery_level: Option<i64>,
    pub charging: Option<i64>, // 0 / 1
    pub network_info: Option<String>, // JSON: NetworkInfo
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy_meters: Option<f64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
