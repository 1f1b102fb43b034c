pub mod delta;
pub mod detector;
pub mod errors;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod report;
pub mod storage;
pub mod thresholds;
