use migration::MigratorTrait;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait, QueryFilter};
use tempfile::NamedTempFile;
use tether::entities;

/// Test database with automatic cleanup
pub struct TestDb {
    connection: DatabaseConnection,
    _temp_file: NamedTempFile,
}

impl TestDb {
    /// Create a new test database with migrations applied
    pub async fn new() -> Self {
        // Create temporary SQLite database file
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let db_path = temp_file.path().to_str().expect("Invalid temp file path");
        let db_url = format!("sqlite://{}?mode=rwc", db_path);

        // A single pooled connection serializes SQLite writers, so racing
        // transactions queue instead of failing with "database is locked"
        let mut options = ConnectOptions::new(db_url);
        options.max_connections(1).sqlx_logging(false);
        let connection = Database::connect(options)
            .await
            .expect("Failed to connect to test database");

        // Run migrations
        migration::Migrator::up(&connection, None)
            .await
            .expect("Failed to run migrations");

        Self {
            connection,
            _temp_file: temp_file,
        }
    }

    /// Get database connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}

/// Move a command's window into the past so the timeout sweep picks it up.
pub async fn lapse_command(db: &DatabaseConnection, command_id: &str) {
    use entities::command::{Column, Entity};

    Entity::update_many()
        .col_expr(Column::ExpiresAt, Expr::value(tether::storage::now() - 1))
        .filter(Column::Id.eq(command_id))
        .exec(db)
        .await
        .expect("Failed to lapse command");
}

/// Move a registration's expiry into the past.
pub async fn lapse_registration(db: &DatabaseConnection, registration_id: &str) {
    use entities::device_registration::{Column, Entity};

    Entity::update_many()
        .col_expr(Column::ExpiresAt, Expr::value(tether::storage::now() - 1))
        .filter(Column::Id.eq(registration_id))
        .exec(db)
        .await
        .expect("Failed to lapse registration");
}

/// Pretend the device's last heartbeat happened `age_secs` ago, leaving the cached
/// status column untouched.
pub async fn age_last_heartbeat(db: &DatabaseConnection, device_id: &str, age_secs: i64) {
    use entities::device::{Column, Entity};

    Entity::update_many()
        .col_expr(
            Column::LastHeartbeatAt,
            Expr::value(tether::storage::now() - age_secs),
        )
        .filter(Column::Id.eq(device_id))
        .exec(db)
        .await
        .expect("Failed to age heartbeat");
}

pub async fn command_row(db: &DatabaseConnection, command_id: &str) -> entities::command::Model {
    entities::Command::find_by_id(command_id.to_string())
        .one(db)
        .await
        .expect("Failed to load command")
        .expect("Command not found")
}

pub async fn device_row(db: &DatabaseConnection, device_id: &str) -> entities::device::Model {
    entities::Device::find_by_id(device_id.to_string())
        .one(db)
        .await
        .expect("Failed to load device")
        .expect("Device not found")
}
