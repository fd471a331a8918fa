//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → StackConfig (validated, immutable)
//!     → socket configs, buffer pool, route table
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → route table rebuilt and swapped (ArcSwap)
//! ```
//!
//! # Design Decisions
//! - Only routes are hot-reloaded; buffer and socket settings need a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_or_default, ConfigError};
pub use schema::{ListenerConfig, RouteConfig, StackConfig};
