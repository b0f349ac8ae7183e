//! SeaORM entity definitions for the carcache database schema.

pub mod car_listing;
pub mod error_category;
pub mod prelude;
pub mod sale_status;
pub mod staged_listing;
pub mod sync_run_status;
pub mod sync_status;
