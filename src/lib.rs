pub mod config;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod metrics;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod push;
pub mod stats;
pub mod telemetry;
