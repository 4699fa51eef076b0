//! Daily foreign-exchange pipeline: provider snapshot (raw) -> validated
//! rates (silver) -> rates with day-over-day change (gold) -> narrative
//! summary. Every layer is a single file per date.

pub mod config;
pub mod error;
pub mod ingest;
pub mod layers;
pub mod output;
pub mod pipeline;
pub mod server;
pub mod source;
pub mod storage;
pub mod summary;
pub mod transform;
