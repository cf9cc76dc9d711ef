// src/lib.rs

//! Async client for a replicated, strongly-consistent key-value store: connection
//! pooling with per-host circuit breaking, a watch multiplexer, a lease manager, an
//! STM engine, leader election, and a distributed lock, all layered over a generated
//! gRPC client (see [`pb`]).
//!
//! [`Client::connect`] is the entry point.

pub mod auth_role;
pub mod auth_user;
pub mod client;
pub mod cluster;
pub mod config;
pub mod election;
pub mod error;
pub mod kv;
pub mod lease;
pub mod lock;
pub mod maintenance;
pub mod namespace;
pub mod pb;
pub mod pool;
pub mod range;
pub mod stm;
pub mod txn;
pub mod watch;

pub use client::{init_tracing, Client};
pub use config::{Config, ConfigBuilder};
pub use error::{ClientError, Result};
