//! Tollgate data plane.
//!
//! Requests name a logical `module`, `method` and `rpcType`. Each request
//! runs through an ordered chain of plugins whose behavior is driven by
//! selectors and rules held in a hot-reloadable [`ConfigCache`].
//!
//! [`ConfigCache`]: tollgate_cache::ConfigCache

pub mod config;
pub mod descriptor;
pub mod gateway;
pub mod limits;
pub mod server;

pub use config::{ConfigError, GatewayConfig};
pub use gateway::{Gateway, GatewayError};
pub use limits::{LimitError, RequestLimits};
pub use server::{start, RunningGateway};
