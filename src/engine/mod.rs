pub mod deriver;
pub mod dispatch;
pub mod ingest;
pub mod lifecycle;
pub mod reset;
pub mod scoring;
