//! Provider metadata types usable across crates.

use core::fmt;

/// Typed key identifying a data provider (credential pool scope, connector state scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderKey(pub &'static str);

impl ProviderKey {
    /// Construct a new typed provider key from a static name.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Returns the inner static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        self.0
    }

    /// Whether a provider name from persisted configuration refers to this key.
    ///
    /// Configuration is written by people, so the comparison ignores ASCII case.
    #[must_use]
    pub fn matches(self, configured: &str) -> bool {
        self.0.eq_ignore_ascii_case(configured.trim())
    }
}

impl From<ProviderKey> for &'static str {
    fn from(k: ProviderKey) -> Self {
        k.0
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}
