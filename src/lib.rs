pub mod auth;
pub mod cascade;
pub mod channel;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod error;
pub mod limits;
pub mod model;
pub mod observability;
pub mod publisher;
pub mod rooms;
pub mod service;
pub mod wal;
pub mod wire;
