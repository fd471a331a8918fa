//! Wildcard-keyed lookup scoped by domain.
//!
//! ```text
//! WildcardIndex (domain → node)
//!     → WildcardIndexNode (key → value, keys may hold one '*')
//! ```

pub mod node;
pub mod wildcard;

pub use node::{wildcard_score, CleanupHandler, Cursor, WildcardIndexNode, MAX_KEY_LEN};
pub use wildcard::{WildcardIndex, MAX_DOMAIN_LEN};
