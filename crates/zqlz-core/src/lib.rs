//! ZQLZ Core - Core abstractions shared by the pool and the drivers
//!
//! This crate provides the fundamental traits and types that all other
//! ZQLZ crates depend on. It defines:
//!
//! - `DatabaseDriver` - Trait for database driver implementations
//! - `Connection` - Trait for database connections
//! - `PreparedStatement` / `CallableStatement` - Prepared statement capabilities
//! - `StatementSignature` - Canonical identity of a prepared statement
//! - Common types like `Value`, `Row`, `QueryResult`, etc.

mod connection;
mod driver;
mod error;
mod statement;
mod types;

pub use connection::*;
pub use driver::*;
pub use error::*;
pub use statement::*;
pub use types::*;
