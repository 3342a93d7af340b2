use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "commands")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub organization_id: String,
    pub device_id: String,
    pub command_type: String, // "PING" | "LOCATE_NOW" | "LOCK" | ...
    pub payload: String,      // JSON, shape depends on command_type
    pub status: String,
    pub attempt_count: i64,
    pub max_attempts: i64,
    pub timeout_secs: i64,
    pub error: Option<String>,
    pub result_payload: Option<String>, // JSON reported by the device
    pub issued_by: String,
    pub created_at: i64,
    pub scheduled_at: i64,
    pub sent_at: Option<i64>,
    pub executed_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub expires_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
