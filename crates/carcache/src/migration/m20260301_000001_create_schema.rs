//! Initial migration to create the carcache database schema.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        self.create_car_listings(manager).await?;
        self.create_staged_listings(manager).await?;
        self.create_sync_status(manager).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SyncStatus::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(StagedListings::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CarListings::Table).to_owned())
            .await?;
        Ok(())
    }
}

impl Migration {
    async fn create_car_listings(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CarListings::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(CarListings::Id).uuid().not_null().primary_key())
                    // Source identity
                    .col(ColumnDef::new(CarListings::ExternalId).string().not_null())
                    .col(ColumnDef::new(CarListings::SourceSite).string().not_null())
                    // Vehicle
                    .col(ColumnDef::new(CarListings::Make).string().not_null())
                    .col(ColumnDef::new(CarListings::Model).string().not_null())
                    .col(ColumnDef::new(CarListings::Year).integer().null())
                    .col(ColumnDef::new(CarListings::PriceCents).big_integer().null())
                    .col(ColumnDef::new(CarListings::MileageKm).big_integer().null())
                    .col(ColumnDef::new(CarListings::Fuel).string().null())
                    .col(ColumnDef::new(CarListings::Transmission).string().null())
                    .col(ColumnDef::new(CarListings::Color).string().null())
                    .col(ColumnDef::new(CarListings::BodyType).string().null())
                    .col(
                        ColumnDef::new(CarListings::Images)
                            .json()
                            .not_null()
                            .default(Expr::cust("'[]'")),
                    )
                    // Lifecycle
                    .col(
                        ColumnDef::new(CarListings::SaleStatus)
                            .string()
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(CarListings::RankScore)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    // Sync bookkeeping
                    .col(
                        ColumnDef::new(CarListings::RawExtra)
                            .json()
                            .not_null()
                            .default(Expr::cust("'{}'")),
                    )
                    .col(ColumnDef::new(CarListings::DataHash).string().not_null())
                    .col(
                        ColumnDef::new(CarListings::LastApiSync)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CarListings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CarListings::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Upsert target
        manager
            .create_index(
                Index::create()
                    .name("idx_car_listings_source_external")
                    .table(CarListings::Table)
                    .col(CarListings::SourceSite)
                    .col(CarListings::ExternalId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Keyset indexes: each sortable column paired with the id tiebreaker
        let sort_indexes = [
            ("idx_car_listings_price_id", CarListings::PriceCents),
            ("idx_car_listings_year_id", CarListings::Year),
            ("idx_car_listings_mileage_id", CarListings::MileageKm),
            ("idx_car_listings_make_id", CarListings::Make),
            ("idx_car_listings_created_id", CarListings::CreatedAt),
            ("idx_car_listings_rank_id", CarListings::RankScore),
        ];
        for (name, column) in sort_indexes {
            manager
                .create_index(
                    Index::create()
                        .name(name)
                        .table(CarListings::Table)
                        .col(column)
                        .col(CarListings::Id)
                        .to_owned(),
                )
                .await?;
        }

        manager
            .create_index(
                Index::create()
                    .name("idx_car_listings_sale_status")
                    .table(CarListings::Table)
                    .col(CarListings::SaleStatus)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_staged_listings(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(StagedListings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StagedListings::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(StagedListings::RunId).uuid().not_null())
                    .col(ColumnDef::new(StagedListings::ListingId).uuid().not_null())
                    .col(ColumnDef::new(StagedListings::ExternalId).string().not_null())
                    .col(ColumnDef::new(StagedListings::SourceSite).string().not_null())
                    .col(ColumnDef::new(StagedListings::Make).string().not_null())
                    .col(ColumnDef::new(StagedListings::Model).string().not_null())
                    .col(ColumnDef::new(StagedListings::Year).integer().null())
                    .col(ColumnDef::new(StagedListings::PriceCents).big_integer().null())
                    .col(ColumnDef::new(StagedListings::MileageKm).big_integer().null())
                    .col(ColumnDef::new(StagedListings::Fuel).string().null())
                    .col(ColumnDef::new(StagedListings::Transmission).string().null())
                    .col(ColumnDef::new(StagedListings::Color).string().null())
                    .col(ColumnDef::new(StagedListings::BodyType).string().null())
                    .col(
                        ColumnDef::new(StagedListings::Images)
                            .json()
                            .not_null()
                            .default(Expr::cust("'[]'")),
                    )
                    .col(
                        ColumnDef::new(StagedListings::SaleStatus)
                            .string()
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(StagedListings::RankScore)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(StagedListings::RawExtra)
                            .json()
                            .not_null()
                            .default(Expr::cust("'{}'")),
                    )
                    .col(ColumnDef::new(StagedListings::DataHash).string().not_null())
                    .col(ColumnDef::new(StagedListings::Page).integer().not_null())
                    .col(
                        ColumnDef::new(StagedListings::StagedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Staging upsert target; also serves the per-run keyset walk
        manager
            .create_index(
                Index::create()
                    .name("idx_staged_listings_run_external")
                    .table(StagedListings::Table)
                    .col(StagedListings::RunId)
                    .col(StagedListings::ExternalId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_staged_listings_run_id")
                    .table(StagedListings::Table)
                    .col(StagedListings::RunId)
                    .col(StagedListings::Id)
                    .to_owned(),
            )
            .await?;

        // Retention sweep
        manager
            .create_index(
                Index::create()
                    .name("idx_staged_listings_staged_at")
                    .table(StagedListings::Table)
                    .col(StagedListings::StagedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_sync_status(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncStatus::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncStatus::Stream)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SyncStatus::Status)
                            .string()
                            .not_null()
                            .default("idle"),
                    )
                    .col(ColumnDef::new(SyncStatus::RunId).uuid().null())
                    .col(
                        ColumnDef::new(SyncStatus::SyncType)
                            .string()
                            .not_null()
                            .default("full"),
                    )
                    .col(
                        ColumnDef::new(SyncStatus::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncStatus::LastActivityAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncStatus::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncStatus::CurrentPage)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncStatus::ResumePage)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(ColumnDef::new(SyncStatus::TotalPages).integer().null())
                    .col(
                        ColumnDef::new(SyncStatus::RecordsProcessed)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncStatus::TotalRecords).big_integer().null())
                    .col(
                        ColumnDef::new(SyncStatus::TotalIsEstimate)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(SyncStatus::FailedPages)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncStatus::ConsecutiveEmptyPages)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncStatus::ErrorMessage).text().null())
                    .col(ColumnDef::new(SyncStatus::ErrorCategory).string().null())
                    .col(
                        ColumnDef::new(SyncStatus::Incomplete)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SyncStatus::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
#[sea_orm(iden = "car_listings")]
enum CarListings {
    Table,
    Id,
    ExternalId,
    SourceSite,
    Make,
    Model,
    Year,
    PriceCents,
    MileageKm,
    Fuel,
    Transmission,
    Color,
    BodyType,
    Images,
    SaleStatus,
    RankScore,
    RawExtra,
    DataHash,
    LastApiSync,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
#[sea_orm(iden = "staged_listings")]
enum StagedListings {
    Table,
    Id,
    RunId,
    ListingId,
    ExternalId,
    SourceSite,
    Make,
    Model,
    Year,
    PriceCents,
    MileageKm,
    Fuel,
    Transmission,
    Color,
    BodyType,
    Images,
    SaleStatus,
    RankScore,
    RawExtra,
    DataHash,
    Page,
    StagedAt,
}

#[derive(DeriveIden)]
#[sea_orm(iden = "sync_status")]
enum SyncStatus {
    Table,
    Stream,
    Status,
    RunId,
    SyncType,
    StartedAt,
    LastActivityAt,
    FinishedAt,
    CurrentPage,
    ResumePage,
    TotalPages,
    RecordsProcessed,
    TotalRecords,
    TotalIsEstimate,
    FailedPages,
    ConsecutiveEmptyPages,
    ErrorMessage,
    ErrorCategory,
    Incomplete,
    UpdatedAt,
}
