use sea_orm_migration::{prelude::*, schema::*};

use crate::m20260901_000002_devices_and_pairing::Devices;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let id_col = match manager.get_database_backend() {
            sea_orm::DatabaseBackend::Postgres => ColumnDef::new(Heartbeats::Id)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key()
                .to_owned(),
            _ => ColumnDef::new(Heartbeats::Id)
                .integer()
                .not_null()
                .auto_increment()
                .primary_key()
                .to_owned(),
        };

        manager
            .create_table(
                Table::create()
                    .table(Heartbeats::Table)
                    .if_not_exists()
                    .col(id_col)
                    .col(string(Heartbeats::DeviceId))
                    .col(string(Heartbeats::OrganizationId))
                    .col(big_integer(Heartbeats::CapturedAt))
                    .col(big_integer(Heartbeats::ReceivedAt))
                    .col(big_integer_null(Heartbeats::BatteryLevel))
                    .col(big_integer_null(Heartbeats::Charging))
                    .col(string_null(Heartbeats::NetworkInfo))
                    .col(double_null(Heartbeats::Latitude))
                    .col(double_null(Heartbeats::Longitude))
                    .col(double_null(Heartbeats::AccuracyMeters))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_heartbeats_device")
                            .from(Heartbeats::Table, Heartbeats::DeviceId)
                            .to(Devices::Table, Devices::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_heartbeats_device_captured")
                    .table(Heartbeats::Table)
                    .col(Heartbeats::DeviceId)
                    .col(Heartbeats::CapturedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_heartbeats_received")
                    .table(Heartbeats::Table)
                    .col(Heartbeats::ReceivedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Heartbeats::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Heartbeats {
    Table,
    Id,
    DeviceId,
    OrganizationId,
    CapturedAt,
    ReceivedAt,
    BatteryLevel,
    Charging,
    NetworkInfo,
    Latitude,
    Longitude,
    AccuracyMeters,
}
