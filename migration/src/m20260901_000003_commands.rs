use sea_orm_migration::{prelude::*, schema::*};

use crate::m20260901_000002_devices_and_pairing::Devices;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Commands::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Commands::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(Commands::OrganizationId))
                    .col(string(Commands::DeviceId))
                    .col(string(Commands::CommandType))
                    .col(string(Commands::Payload))
                    .col(
                        ColumnDef::new(Commands::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Commands::AttemptCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(big_integer(Commands::MaxAttempts))
                    .col(big_integer(Commands::TimeoutSecs))
                    .col(string_null(Commands::Error))
                    .col(string_null(Commands::ResultPayload))
                    .col(string(Commands::IssuedBy))
                    .col(big_integer(Commands::CreatedAt))
                    .col(big_integer(Commands::ScheduledAt))
                    .col(big_integer_null(Commands::SentAt))
                    .col(big_integer_null(Commands::ExecutedAt))
                    .col(big_integer_null(Commands::CompletedAt))
                    .col(big_integer(Commands::ExpiresAt))
                    .col(big_integer(Commands::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_commands_device")
                            .from(Commands::Table, Commands::DeviceId)
                            .to(Devices::Table, Devices::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_commands_device")
                    .table(Commands::Table)
                    .col(Commands::OrganizationId)
                    .col(Commands::DeviceId)
                    .to_owned(),
            )
            .await?;

        // Dispatcher scans: (status, scheduled_at) for due work, (status, expires_at) for sweeps
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_commands_status_scheduled")
                    .table(Commands::Table)
                    .col(Commands::Status)
                    .col(Commands::ScheduledAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_commands_status_expires")
                    .table(Commands::Table)
                    .col(Commands::Status)
                    .col(Commands::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        let id_col = match manager.get_database_backend() {
            sea_orm::DatabaseBackend::Postgres => ColumnDef::new(CommandAttempts::Id)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key()
                .to_owned(),
            _ => ColumnDef::new(CommandAttempts::Id)
                .integer()
                .not_null()
                .auto_increment()
                .primary_key()
                .to_owned(),
        };

        manager
            .create_table(
                Table::create()
                    .table(CommandAttempts::Table)
                    .if_not_exists()
                    .col(id_col)
                    .col(string(CommandAttempts::CommandId))
                    .col(string(CommandAttempts::OrganizationId))
                    .col(big_integer(CommandAttempts::AttemptNumber))
                    .col(big_integer(CommandAttempts::StartedAt))
                    .col(big_integer_null(CommandAttempts::FinishedAt))
                    .col(
                        ColumnDef::new(CommandAttempts::Outcome)
                            .string()
                            .not_null()
                            .default("in_flight"),
                    )
                    .col(string_null(CommandAttempts::Error))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_command_attempts_command")
                            .from(CommandAttempts::Table, CommandAttempts::CommandId)
                            .to(Commands::Table, Commands::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_command_attempts_command")
                    .table(CommandAttempts::Table)
                    .col(CommandAttempts::CommandId)
                    .col(CommandAttempts::AttemptNumber)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CommandAttempts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Commands::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Commands {
    Table,
    Id,
    OrganizationId,
    DeviceId,
    CommandType,
    Payload,
    Status,
    AttemptCount,
    MaxAttempts,
    TimeoutSecs,
    Error,
    ResultPayload,
    IssuedBy,
    CreatedAt,
    ScheduledAt,
    SentAt,
    ExecutedAt,
    CompletedAt,
    ExpiresAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum CommandAttempts {
    Table,
    Id,
    CommandId,
    OrganizationId,
    AttemptNumber,
    StartedAt,
    FinishedAt,
    Outcome,
    Error,
}
