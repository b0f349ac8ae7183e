//! Common re-exports for convenient entity usage.

pub use super::car_listing::{
    ActiveModel as CarListingActiveModel, Column as CarListingColumn, Entity as CarListing,
    Model as CarListingModel,
};
pub use super::error_category::ErrorCategory;
pub use super::sale_status::SaleStatus;
pub use super::staged_listing::{
    ActiveModel as StagedListingActiveModel, Column as StagedListingColumn,
    Entity as StagedListing, Model as StagedListingModel,
};
pub use super::sync_run_status::{SyncRunStatus, SyncType};
pub use super::sync_status::{
    ActiveModel as SyncStatusActiveModel, Column as SyncStatusColumn, Entity as SyncStatus,
    Model as SyncStatusModel,
};
