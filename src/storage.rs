use crate::errors::TetherError;
use crate::settings::Database as DbCfg;
use base64ct::Encoding;
use chrono::Utc;
use rand::RngCore;
use sea_orm::{Database, DatabaseConnection};
use migration::MigratorTrait;

pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, TetherError> {
    let db = Database::connect(&cfg.url).await?;
    Ok(db)
}

/// Bring the schema up to date.
pub async fn migrate(db: &DatabaseConnection) -> Result<(), TetherError> {
    migration::Migrator::up(db, None).await?;
    Ok(())
}

/// Current wall-clock time in unix seconds. Every expiry and presence decision reads
/// the clock at call time through this.
pub fn now() -> i64 {
    Utc::now().timestamp()
}

/// Opaque 128-bit identifier, URL safe.
pub fn random_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}
