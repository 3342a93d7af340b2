use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "device_registrations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub organization_id: String,
    pub pairing_code: String,
    pub description: Option<String>,
    pub descriptor: Option<String>, // JSON: DeviceDescriptor, set on submission
    pub status: String,             // "pending" | "approved" | "rejected" | "expired"
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
    pub live_code: Option<String>, // pairing_code while redeemable, NULL once settled
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
