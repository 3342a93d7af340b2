use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Holds the pairing code while the registration can still be redeemed and
        // NULL afterwards, so the unique index only covers live codes
        manager
            .alter_table(
                Table::alter()
                    .table(DeviceRegistrations::Table)
                    .add_column(string_null(DeviceRegistrations::LiveCode))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_device_registrations_live_code")
                    .table(DeviceRegistrations::Table)
                    .col(DeviceRegistrations::LiveCode)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_device_registrations_live_code")
                    .table(DeviceRegistrations::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .alter_table(
                Table::alter()
                    .table(DeviceRegistrations::Table)
                    .drop_column(DeviceRegistrations::LiveCode)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum DeviceRegistrations {
    Table,
    LiveCode,
}
