// src/pool/mod.rs

//! Connection pool and fault-handling layer: owns a set of [`Host`]s, executes calls
//! under a global retry policy plus per-host circuit breaking, and injects auth
//! metadata transparently.

mod auth;
mod host;
mod policy;
mod pool;

pub use auth::Authenticator;
pub use host::{AnyClient, Host, ServiceKind};
pub use policy::{CircuitBreaker, RetryPolicy};
pub use pool::{CallContext, CallOptions, Pool};
