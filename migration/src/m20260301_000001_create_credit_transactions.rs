use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum CreditTransactions {
    Table,
    Id,
    UserId,
    Sequence,
    Amount,
    BalanceAfter,
    TransactionType,
    RelatedEntityId,
    Status,
    Description,
    IdempotencyKey,
    CreatedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CreditTransactions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CreditTransactions::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CreditTransactions::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(CreditTransactions::Sequence)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CreditTransactions::Amount)
                            .big_integer()
                            .not_null(),
                    )
                    // floor at zero: a debit that would overdraw is rejected by the database too
                    .col(
                        ColumnDef::new(CreditTransactions::BalanceAfter)
                            .big_integer()
                            .not_null()
                            .check(Expr::col(CreditTransactions::BalanceAfter).gte(0)),
                    )
                    .col(
                        ColumnDef::new(CreditTransactions::TransactionType)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CreditTransactions::RelatedEntityId)
                            .uuid()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CreditTransactions::Status)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(CreditTransactions::Description).text().null())
                    .col(
                        ColumnDef::new(CreditTransactions::IdempotencyKey)
                            .string_len(128)
                            .null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(CreditTransactions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // ledger tail compare-and-swap key
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("uq_credit_transactions_user_sequence")
                    .table(CreditTransactions::Table)
                    .col(CreditTransactions::UserId)
                    .col(CreditTransactions::Sequence)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_credit_transactions_related_entity")
                    .table(CreditTransactions::Table)
                    .col(CreditTransactions::RelatedEntityId)
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
                    .table(CreditTransactions::Table)
                    .to_owned(),
            )
            .await?;
        Ok(())
    }
}
