//! Config items: small named/described records used by the registry.
//!
//! Names and descriptions live in fixed-capacity, zero-terminated byte buffers
//! (`BoundedName`). A buffer that was never written decodes to the empty string.
//! Writes are truncated at a UTF-8 character boundary so that decoding never fails.

use std::fmt;

use crate::error::{Error, Result};

/// Capacity of the name buffer, terminator included.
pub const MAX_NAME_LENGTH: usize = 32;
/// Capacity of the short description buffer, terminator included.
pub const MAX_SHORT_DESC_LENGTH: usize = 10;
/// Capacity of the description buffer, terminator included.
pub const MAX_DESC_LENGTH: usize = 192;

/// A zero-terminated string stored in a fixed `N`-byte buffer.
///
/// At most `N - 1` content bytes are stored; the byte after the content is always 0.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundedName<const N: usize> {
    buf: [u8; N],
}

impl<const N: usize> BoundedName<N> {
    /// Buffer capacity in bytes, terminator included.
    pub const CAPACITY: usize = N;

    /// An empty (all-zero) buffer.
    pub fn new() -> Self {
        Self { buf: [0; N] }
    }

    /// Build a buffer holding exactly `value`, rejecting values that would be truncated.
    pub fn try_new(value: &str) -> Result<Self> {
        let mut name = Self::new();
        if name.set(value) {
            return Err(Error::NameTooLong {
                name: value.to_string(),
                capacity: N,
            });
        }
        Ok(name)
    }

    /// Overwrite the buffer with `value`.
    ///
    /// Content stops at the first NUL of `value` and is cut to fit `N - 1` bytes without
    /// splitting a character. Returns `true` when anything was dropped.
    pub fn set(&mut self, value: &str) -> bool {
        let content = value.split('\0').next().unwrap_or_default();
        let mut end = content.len().min(N.saturating_sub(1));
        while !content.is_char_boundary(end) {
            end -= 1;
        }

        self.buf = [0; N];
        self.buf[..end].copy_from_slice(&content.as_bytes()[..end]);
        end < value.len()
    }

    /// Decode the buffer up to the first terminator.
    pub fn as_str(&self) -> &str {
        let len = self.buf.iter().position(|&b| b == 0).unwrap_or(N);
        // Only whole characters are ever written.
        std::str::from_utf8(&self.buf[..len]).unwrap_or_default()
    }

    /// The raw buffer, terminator and padding included.
    pub fn as_bytes(&self) -> &[u8; N] {
        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.first().map_or(true, |&b| b == 0)
    }
}

impl<const N: usize> Default for BoundedName<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for BoundedName<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl<const N: usize> fmt::Display for BoundedName<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registry entry (model, layout, variant, option group or option), also usable as a
/// lightweight name container.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ConfigItem {
    pub name: BoundedName<MAX_NAME_LENGTH>,
    pub short_description: BoundedName<MAX_SHORT_DESC_LENGTH>,
    pub description: BoundedName<MAX_DESC_LENGTH>,
}

impl ConfigItem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Item with the given name and empty descriptions.
    pub fn with_name(name: &str) -> Self {
        let mut item = Self::new();
        item.set_name(name);
        item
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn short_description(&self) -> &str {
        self.short_description.as_str()
    }

    pub fn description(&self) -> &str {
        self.description.as_str()
    }

    /// Set the name, truncating to fit the buffer.
    pub fn set_name(&mut self, name: &str) {
        if self.name.set(name) {
            tracing::warn!("Config item name '{}' truncated to '{}'", name, self.name);
        }
    }

    pub fn set_short_description(&mut self, text: &str) {
        self.short_description.set(text);
    }

    pub fn set_description(&mut self, text: &str) {
        self.description.set(text);
    }
}
