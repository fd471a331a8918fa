//! Domain-scoped wildcard map used for virtual host routing.
//!
//! # Responsibilities
//! - Keep one [`WildcardIndexNode`] per domain, created on first insert and
//!   dropped when its last key is removed
//! - Exact lookups (`find`) and best-wildcard lookups (`match_key`)
//!
//! # Design Decisions
//! - Nodes live in a `DashMap` so route reloads can build an index on one
//!   thread while readers on reactor threads hold an older one.
//! - `clear` is the only operation that runs the cleanup handler. Dropping
//!   the index just releases the values.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::index::node::{CleanupHandler, WildcardIndexNode};

/// Longest domain accepted as a key.
pub const MAX_DOMAIN_LEN: usize = 255;

pub struct WildcardIndex<V> {
    nodes: DashMap<String, WildcardIndexNode<V>>,
    cleanup: Option<Arc<dyn CleanupHandler<V>>>,
}

impl<V> Default for WildcardIndex<V> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<V> WildcardIndex<V> {
    pub fn new(cleanup: Option<Arc<dyn CleanupHandler<V>>>) -> Self {
        Self {
            nodes: DashMap::new(),
            cleanup,
        }
    }

    /// Number of domains with at least one key.
    pub fn domain_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn insert(&self, domain: &str, key: &str, value: Arc<V>, update_if_exists: bool) -> Result<()> {
        validate_domain(domain)?;
        if let Some(mut node) = self.nodes.get_mut(domain) {
            return node.insert(key, value, update_if_exists);
        }

        let mut node = WildcardIndexNode::new(domain, self.cleanup.clone());
        node.insert(key, value, update_if_exists)?;
        match self.nodes.entry(domain.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut existing) => {
                // lost a race with another inserter for the same domain
                let mut it = node.first();
                while !node.last(it) {
                    existing.get_mut().insert(node.key(it)?, node.value(it)?, update_if_exists)?;
                    it = node.next(it);
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(node);
            }
        }
        Ok(())
    }

    pub fn remove(&self, domain: &str, key: &str) -> Result<()> {
        let empty = {
            let mut node = self.nodes.get_mut(domain).ok_or(Error::CannotFind)?;
            node.remove(key)?;
            node.is_empty()
        };
        if empty {
            self.nodes.remove_if(domain, |_, node| node.is_empty());
        }
        Ok(())
    }

    /// Swap the value stored under an existing key, returning the old one.
    pub fn update(&self, domain: &str, key: &str, value: Arc<V>) -> Result<Arc<V>> {
        let mut node = self.nodes.get_mut(domain).ok_or(Error::CannotFind)?;
        node.update(key, value)
    }

    /// Exact key lookup.
    pub fn find(&self, domain: &str, key: &str) -> Result<Arc<V>> {
        let node = self.nodes.get(domain).ok_or(Error::CannotFind)?;
        node.find(key)
    }

    /// Exact key first, then the most specific wildcard key.
    pub fn match_key(&self, domain: &str, name: &str) -> Result<Arc<V>> {
        let node = self.nodes.get(domain).ok_or(Error::CannotFind)?;
        node.matches(name).ok_or(Error::CannotFind)
    }

    /// Run `f` against one domain's node, e.g. to iterate its keys.
    pub fn with_node<R>(&self, domain: &str, f: impl FnOnce(&WildcardIndexNode<V>) -> R) -> Option<R> {
        self.nodes.get(domain).map(|node| f(&node))
    }

    /// Drop every entry, running the cleanup handler once per value.
    pub fn clear(&self) {
        for mut node in self.nodes.iter_mut() {
            node.clear();
        }
        self.nodes.clear();
        self.nodes.shrink_to_fit();
    }
}

fn validate_domain(domain: &str) -> Result<()> {
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN {
        return Err(Error::InvalidArgument);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodes_appear_and_disappear_with_their_keys() {
        let index = WildcardIndex::<u32>::default();
        index.insert("a.com", "x", Arc::new(1), false).unwrap();
        index.insert("a.com", "y*", Arc::new(2), false).unwrap();
        index.insert("b.com", "x", Arc::new(3), false).unwrap();
        assert_eq!(index.domain_count(), 2);

        index.remove("b.com", "x").unwrap();
        assert_eq!(index.domain_count(), 1);
        assert!(matches!(index.find("b.com", "x"), Err(Error::CannotFind)));
        assert!(matches!(index.remove("b.com", "x"), Err(Error::CannotFind)));
        assert_eq!(index.with_node("a.com", |node| node.len()), Some(2));
    }

    #[test]
    fn domain_bounds() {
        let index = WildcardIndex::<u32>::default();
        assert!(matches!(index.insert("", "x", Arc::new(1), false), Err(Error::InvalidArgument)));
        let long = "d".repeat(MAX_DOMAIN_LEN + 1);
        assert!(matches!(index.insert(&long, "x", Arc::new(1), false), Err(Error::InvalidArgument)));
    }

    #[test]
    fn failed_first_insert_leaves_no_node() {
        let index = WildcardIndex::<u32>::default();
        assert!(matches!(index.insert("a.com", "", Arc::new(1), false), Err(Error::Underflow)));
        assert_eq!(index.domain_count(), 0);
    }
}
