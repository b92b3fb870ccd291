use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum GenerationRecords {
    Table,
    Id,
    UserId,
    OperationType,
    Status,
    InputUrl,
    OutputUrl,
    CreditConsumed,
    ProviderTaskId,
    ErrorMessage,
    Parameters,
    ResultMetadata,
    ClaimToken,
    ClaimedAt,
    CreatedAt,
    UpdatedAt,
    CompletedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(GenerationRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(GenerationRecords::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(GenerationRecords::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(GenerationRecords::OperationType)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GenerationRecords::Status)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(GenerationRecords::InputUrl).text().not_null())
                    .col(ColumnDef::new(GenerationRecords::OutputUrl).text().null())
                    .col(
                        ColumnDef::new(GenerationRecords::CreditConsumed)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GenerationRecords::ProviderTaskId)
                            .string_len(128)
                            .null(),
                    )
                    .col(ColumnDef::new(GenerationRecords::ErrorMessage).text().null())
                    .col(ColumnDef::new(GenerationRecords::Parameters).json().not_null())
                    .col(ColumnDef::new(GenerationRecords::ResultMetadata).json().null())
                    .col(ColumnDef::new(GenerationRecords::ClaimToken).uuid().null())
                    .col(
                        ColumnDef::new(GenerationRecords::ClaimedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(GenerationRecords::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GenerationRecords::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GenerationRecords::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_generation_records_user_created")
                    .table(GenerationRecords::Table)
                    .col(GenerationRecords::UserId)
                    .col(GenerationRecords::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // used by the stale-processing sweep
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_generation_records_status_updated")
                    .table(GenerationRecords::Table)
                    .col(GenerationRecords::Status)
                    .col(GenerationRecords::UpdatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .if_exists()
                    .table(GenerationRecords::Table)
                    .to_owned(),
            )
            .await?;
        Ok(())
    }
}
