use sea_orm_migration::{prelude::*, schema::*};

use crate::m20260901_000001_tenancy::Organizations;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Devices::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Devices::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(Devices::OrganizationId))
                    .col(string(Devices::DisplayName))
                    .col(
                        ColumnDef::new(Devices::Status)
                            .string()
                            .not_null()
                            .default("offline"),
                    )
                    .col(string_null(Devices::PushAddress))
                    .col(big_integer_null(Devices::LastSeenAt))
                    .col(big_integer_null(Devices::LastHeartbeatAt))
                    .col(string_null(Devices::Model))
                    .col(string_null(Devices::OsVersion))
                    .col(string_null(Devices::HardwareId))
                    .col(string_null(Devices::OwnerMetadata))
                    .col(string_null(Devices::RegistrationId))
                    .col(big_integer(Devices::CreatedAt))
                    .col(big_integer(Devices::UpdatedAt))
                    .col(big_integer_null(Devices::DeletedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_devices_organization")
                            .from(Devices::Table, Devices::OrganizationId)
                            .to(Organizations::Table, Organizations::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_devices_organization")
                    .table(Devices::Table)
                    .col(Devices::OrganizationId)
                    .to_owned(),
            )
            .await?;

        // Bulk presence sweeps filter on status and heartbeat recency
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_devices_status_heartbeat")
                    .table(Devices::Table)
                    .col(Devices::Status)
                    .col(Devices::LastHeartbeatAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DeviceRegistrations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DeviceRegistrations::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(DeviceRegistrations::OrganizationId))
                    .col(string(DeviceRegistrations::PairingCode))
                    .col(string_null(DeviceRegistrations::Description))
                    .col(string_null(DeviceRegistrations::Descriptor))
                    .col(
                        ColumnDef::new(DeviceRegistrations::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(string(DeviceRegistrations::IssuedBy))
                    .col(big_integer(DeviceRegistrations::CreatedAt))
                    .col(big_integer(DeviceRegistrations::ExpiresAt))
                    .col(big_integer_null(DeviceRegistrations::SubmittedAt))
                    .col(string_null(DeviceRegistrations::ApprovedBy))
                    .col(big_integer_null(DeviceRegistrations::ApprovedAt))
                    .col(string_null(DeviceRegistrations::RejectedBy))
                    .col(big_integer_null(DeviceRegistrations::RejectedAt))
                    .col(string_null(DeviceRegistrations::RejectionReason))
                    .col(string_null(DeviceRegistrations::DeviceId))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_device_registrations_organization")
                            .from(
                                DeviceRegistrations::Table,
                                DeviceRegistrations::OrganizationId,
                            )
                            .to(Organizations::Table, Organizations::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        // Pairing codes are a global lookup key
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_device_registrations_code")
                    .table(DeviceRegistrations::Table)
                    .col(DeviceRegistrations::PairingCode)
                    .col(DeviceRegistrations::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_device_registrations_org_status")
                    .table(DeviceRegistrations::Table)
                    .col(DeviceRegistrations::OrganizationId)
                    .col(DeviceRegistrations::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_device_registrations_expires")
                    .table(DeviceRegistrations::Table)
                    .col(DeviceRegistrations::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DeviceRegistrations::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Devices::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
pub(crate) enum Devices {
    Table,
    Id,
    OrganizationId,
    DisplayName,
    Status,
    PushAddress,
    LastSeenAt,
    LastHeartbeatAt,
    Model,
    OsVersion,
    HardwareId,
    OwnerMetadata,
    RegistrationId,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(DeriveIden)]
enum DeviceRegistrations {
    Table,
    Id,
    OrganizationId,
    PairingCode,
    Description,
    Descriptor,
    Status,
    IssuedBy,
    CreatedAt,
    ExpiresAt,
    SubmittedAt,
    ApprovedBy,
    ApprovedAt,
    RejectedBy,
    RejectedAt,
    RejectionReason,
    DeviceId,
}
