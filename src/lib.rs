pub mod carpenter;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod storage;
pub mod types;

// Per-listing ingestion: ids, extraction, normalization, dispatch
pub mod external_id;
pub mod extraction;
pub mod normalize;
pub mod pipeline;
pub mod sites;
pub mod tasks;

// Persisted entity shapes
pub mod domain;
