pub(crate) mod merge;
pub(crate) mod migrate;
pub(crate) mod purge;
pub(crate) mod serve;
pub(crate) mod status;
pub(crate) mod sync;
pub(crate) mod watchdog;
