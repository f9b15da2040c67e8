//! TierSync Shared Library
//!
//! Database plumbing used by every binary in the workspace.

pub mod db;

pub use db::{create_pool, create_pool_with, run_migrations, DbConfig};
