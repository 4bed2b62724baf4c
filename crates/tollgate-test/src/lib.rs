//! Test harness for the Tollgate gateway.
//!
//! Provides `TestGateway` for full-stack integration tests: an in-process
//! gateway fed from an in-memory configuration store.

pub mod gateway;

pub use gateway::{TestError, TestGateway};
