pub use sea_orm_migration::prelude::*;

mod m20260901_000001_tenancy;
mod m20260901_000002_devices_and_pairing;
mod m20260901_000003_commands;
mod m20260901_000004_heartbeats;
mod m20261018_000001_live_pairing_codes;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260901_000001_tenancy::Migration),
            Box::new(m20260901_000002_devices_and_pairing::Migration),
            Box::new(m20260901_000003_commands::Migration),
            Box::new(m20260901_000004_heartbeats::Migration),
            Box::new(m20261018_000001_live_pairing_codes::Migration),
        ]
    }
}
