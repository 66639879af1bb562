//! Coursebridge - registry to LMS enrollment sync daemon
//!
//! The daemon keeps LMS course enrollments in line with group memberships
//! held in a membership registry. Two paths feed the same sync machinery:
//!
//! - an interactive path, where a front door writes a user id to a Unix
//!   socket and the user's enrollments are reconciled within seconds
//! - a scheduled path, where once a day every mapped course is rebuilt
//!   from the registry's group rosters
//!
//! A SQLite staleness store debounces repeated triggers and rate-limits
//! the daily reconciliation, so both paths stay idempotent and cheap.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use coursebridge::{BridgeConfig, Daemon};
//!
//! fn main() -> coursebridge::Result<()> {
//!     let config = BridgeConfig::from_file("./instance/config.json")?;
//!     Daemon::new(config).run()
//! }
//! ```

pub mod config;
pub mod daemon;
pub mod error;
pub mod lms;
pub mod queue;
pub mod receiver;
pub mod registry;
pub mod storage;
pub mod sync;
pub mod task;
pub mod worker;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::BridgeConfig;
pub use daemon::Daemon;
pub use error::{BridgeError, Result};
pub use task::SyncTask;
