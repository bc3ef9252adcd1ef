pub mod build_tool;
pub mod config;
pub mod data_types;
pub mod export;
pub mod ingest;
pub mod logging;
pub mod orchestrator;
pub mod records;
pub mod store;

extern crate lazy_static;
