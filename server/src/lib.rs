pub mod adapters;
pub mod app;
pub mod config;
pub mod desk;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod fields;
pub mod http;
pub mod materializer;
pub mod outbound;
pub mod prompting;
pub mod realtime;
pub mod store;
pub mod types;
pub mod validate;
