//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for the identifiers the engine juggles. Keeping
//! node handles, inode ids and bind handles as distinct types makes it
//! impossible to hand a cloud identifier to an API expecting a local one.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// NodeHandle
// ============================================================================

/// Cloud-side node identifier.
///
/// Handles are opaque 48-bit values issued by the cloud. An absent handle is
/// always expressed as `Option<NodeHandle>`; there is no in-band sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeHandle(u64);

impl NodeHandle {
    /// Largest value a cloud handle can take (48 bits).
    pub const MAX: u64 = (1 << 48) - 1;

    /// Wrap a raw cloud handle.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidHandle` if the value exceeds 48 bits.
    pub fn new(raw: u64) -> Result<Self, DomainError> {
        if raw > Self::MAX {
            return Err(DomainError::InvalidHandle(raw));
        }
        Ok(Self(raw))
    }

    /// Get the raw handle value.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl Display for NodeHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:012x}", self.0)
    }
}

impl TryFrom<u64> for NodeHandle {
    type Error = DomainError;

    fn try_from(raw: u64) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

// ============================================================================
// InodeId
// ============================================================================

/// Local inode identifier.
///
/// Two varieties share the 64-bit space without colliding:
/// - *handle-derived* ids are numerically equal to the cloud handle of the
///   node they describe, so they fit in 48 bits;
/// - *synthetic* ids are drawn from a persisted counter that starts at
///   [`InodeId::SYNTHETIC_BASE`], above everything a handle can be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InodeId(u64);

impl InodeId {
    /// First synthetic id; also the initial value of the persisted counter.
    pub const SYNTHETIC_BASE: u64 = 1 << 48;

    /// Wrap a raw id previously issued by this engine.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Derive the id of a cloud-resident inode from its handle.
    #[must_use]
    pub const fn from_handle(handle: NodeHandle) -> Self {
        Self(handle.get())
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// True when this id was allocated locally and has no handle twin.
    #[must_use]
    pub const fn is_synthetic(&self) -> bool {
        self.0 >= Self::SYNTHETIC_BASE
    }

    /// The handle this id mirrors, if it is handle-derived.
    #[must_use]
    pub fn as_handle(&self) -> Option<NodeHandle> {
        if self.is_synthetic() {
            return None;
        }
        NodeHandle::new(self.0).ok()
    }
}

impl Display for InodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<NodeHandle> for InodeId {
    fn from(handle: NodeHandle) -> Self {
        Self::from_handle(handle)
    }
}

// ============================================================================
// BindHandle
// ============================================================================

/// Transient token naming a pending upload by its target slot.
///
/// Issued by the cloud when an upload begins; unique while the upload is in
/// flight; cleared when the upload completes or is abandoned. The engine uses
/// it to stitch the eventual `Added` event back to the local inode that
/// originated the upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BindHandle(String);

impl BindHandle {
    /// Wrap a cloud-issued bind token.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidBindHandle` if the token is empty.
    pub fn new(token: String) -> Result<Self, DomainError> {
        if token.is_empty() {
            return Err(DomainError::InvalidBindHandle(
                "bind handle cannot be empty".to_string(),
            ));
        }
        Ok(Self(token))
    }

    /// Get the inner token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for BindHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BindHandle {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for BindHandle {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<BindHandle> for String {
    fn from(handle: BindHandle) -> Self {
        handle.0
    }
}

// ============================================================================
// FileExtension
// ============================================================================

/// A file's lowercased extension, including the leading dot.
///
/// Extensions address content in the file cache, so they are normalized once
/// at construction and shared thereafter (`Arc<str>` makes clones free; the
/// cache crate interns them so equal extensions share one allocation).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileExtension(Arc<str>);

impl FileExtension {
    /// The empty extension, used for names without one.
    #[must_use]
    pub fn none() -> Self {
        Self(Arc::from(""))
    }

    /// Normalize a raw extension string (`"TXT"`, `".txt"` → `".txt"`).
    #[must_use]
    pub fn new(raw: &str) -> Self {
        if raw.is_empty() {
            return Self::none();
        }
        let trimmed = raw.trim_start_matches('.');
        if trimmed.is_empty() {
            return Self::none();
        }
        let mut normalized = String::with_capacity(trimmed.len() + 1);
        normalized.push('.');
        normalized.push_str(&trimmed.to_lowercase());
        Self(Arc::from(normalized.as_str()))
    }

    /// Extract the extension from a file name (`"Note.TXT"` → `".txt"`).
    ///
    /// Dotfiles like `".profile"` have no extension.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.rfind('.') {
            Some(0) | None => Self::none(),
            Some(idx) => Self::new(&name[idx..]),
        }
    }

    /// Get the normalized extension, empty when there is none.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the empty extension.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for FileExtension {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
