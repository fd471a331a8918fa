//! One domain's wildcard keys.
//!
//! A key is 1 to 255 bytes and may contain a single `*` standing for any run
//! of bytes (possibly empty). Keys are kept in insertion order; lookups are
//! linear, which is fine for the handful of keys a domain carries.

use std::sync::Arc;

use crate::error::{Error, Result};

/// Longest key a node accepts.
pub const MAX_KEY_LEN: usize = 255;

/// Invoked for every value dropped by an explicit `clear`.
///
/// Dropping a node or index without calling `clear` only releases its
/// references and never calls the handler.
pub trait CleanupHandler<V>: Send + Sync {
    fn cleanup(&self, value: &Arc<V>);
}

/// Position in a node's key list, see [`WildcardIndexNode::first`].
pub type Cursor = usize;

pub struct WildcardIndexNode<V> {
    domain: String,
    entries: Vec<(String, Arc<V>)>,
    cleanup: Option<Arc<dyn CleanupHandler<V>>>,
}

impl<V> WildcardIndexNode<V> {
    pub fn new(domain: impl Into<String>, cleanup: Option<Arc<dyn CleanupHandler<V>>>) -> Self {
        Self {
            domain: domain.into(),
            entries: Vec::new(),
            cleanup,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(existing, _)| existing == key)
    }

    pub fn insert(&mut self, key: &str, value: Arc<V>, update_if_exists: bool) -> Result<()> {
        validate_key(key)?;
        if key.bytes().filter(|&b| b == b'*').count() > 1 {
            return Err(Error::InvalidArgument);
        }

        match self.position(key) {
            Some(_) if !update_if_exists => Err(Error::UniquenessViolation),
            Some(index) => {
                self.entries[index].1 = value;
                Ok(())
            }
            None => {
                self.entries.push((key.to_string(), value));
                Ok(())
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidArgument);
        }
        if key.len() > MAX_KEY_LEN {
            return Err(Error::CannotFind);
        }
        let index = self.position(key).ok_or(Error::CannotFind)?;
        self.entries.remove(index);
        Ok(())
    }

    /// Exact lookup; a `*` in `key` is matched literally.
    pub fn find(&self, key: &str) -> Result<Arc<V>> {
        self.position(key)
            .map(|index| Arc::clone(&self.entries[index].1))
            .ok_or(Error::CannotFind)
    }

    /// Replace the value of an existing key, returning the previous one.
    pub fn update(&mut self, key: &str, value: Arc<V>) -> Result<Arc<V>> {
        let index = self.position(key).ok_or(Error::CannotFind)?;
        Ok(std::mem::replace(&mut self.entries[index].1, value))
    }

    /// Best entry for `name`: an exact key first, otherwise the wildcard key
    /// that leaves the fewest bytes to the `*`.
    pub fn matches(&self, name: &str) -> Option<Arc<V>> {
        let mut best: Option<(usize, &Arc<V>)> = None;
        for (key, value) in &self.entries {
            match wildcard_score(key, name) {
                Some(0) => return Some(Arc::clone(value)),
                Some(score) if best.map_or(true, |(current, _)| score < current) => best = Some((score, value)),
                _ => {}
            }
        }
        best.map(|(_, value)| Arc::clone(value))
    }

    /// Drop every entry, running the cleanup handler once per value.
    pub fn clear(&mut self) {
        for (_, value) in self.entries.drain(..) {
            if let Some(handler) = &self.cleanup {
                handler.cleanup(&value);
            }
        }
        self.entries.shrink_to_fit();
    }

    // Iteration. Keys must not be added or removed while iterating.

    pub fn first(&self) -> Cursor {
        0
    }

    pub fn next(&self, it: Cursor) -> Cursor {
        (it + 1).min(self.entries.len())
    }

    pub fn last(&self, it: Cursor) -> bool {
        it >= self.entries.len()
    }

    pub fn key(&self, it: Cursor) -> Result<&str> {
        self.entries.get(it).map(|(key, _)| key.as_str()).ok_or(Error::CannotFind)
    }

    pub fn value(&self, it: Cursor) -> Result<Arc<V>> {
        self.entries.get(it).map(|(_, value)| Arc::clone(value)).ok_or(Error::CannotFind)
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::Underflow);
    }
    if key.len() > MAX_KEY_LEN {
        return Err(Error::Overflow);
    }
    Ok(())
}

/// 0 for an exact match, otherwise 1 + the number of bytes the `*` absorbs.
/// `None` when `pattern` does not match `name`.
pub fn wildcard_score(pattern: &str, name: &str) -> Option<usize> {
    let Some(star) = pattern.find('*') else {
        return (pattern == name).then_some(0);
    };
    let prefix = &pattern[..star];
    let suffix = &pattern[star + 1..];
    if name.len() < prefix.len() + suffix.len() || !name.starts_with(prefix) || !name.ends_with(suffix) {
        return None;
    }
    Some(name.len() - prefix.len() - suffix.len() + 1)
}
