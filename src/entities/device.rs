use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "devices")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub organization_id: String,
    pub display_name: String,
    /// Last written presence; readers recompute from `last_heartbeat_at`.
    pub status: String, // "online" | "offline" | "inactive" | "maintenance"
    pub push_address: Option<String>,
    pub last_seen_at: Option<i64>,
    pub last_heartbeat_at: Option<i64>,
    pub model: Option<String>,
    pub os_version: Option<String>,
    pub hardware_id: Option<String>,
    pub owner_metadata: Option<String>, // JSON object
    pub registration_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
