// Shirushi watermark task orchestration library

pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod policy;
pub mod provenance;
pub mod signing;
pub mod storage;
pub mod store;
pub mod tracker;
pub mod worker;
