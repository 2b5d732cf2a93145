use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tickerfeed_types::ProviderKey;

/// Identity of a credential slot inside a pool.
///
/// Ids are never reused, so an outcome reported for a slot that was removed by a
/// configuration change is recognised and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u64);

/// A credential handed out by the pool for one request or session.
#[derive(Clone)]
pub struct Credential {
    provider: ProviderKey,
    slot: SlotId,
    api_key: Arc<str>,
    cooling_for: Option<Duration>,
}

impl Credential {
    /// Build a handle. Normally only the credential pool does this.
    #[must_use]
    pub const fn new(
        provider: ProviderKey,
        slot: SlotId,
        api_key: Arc<str>,
        cooling_for: Option<Duration>,
    ) -> Self {
        Self {
            provider,
            slot,
            api_key,
            cooling_for,
        }
    }

    /// Provider the key belongs to.
    #[must_use]
    pub const fn provider(&self) -> ProviderKey {
        self.provider
    }

    /// Slot the key came from.
    #[must_use]
    pub const fn slot(&self) -> SlotId {
        self.slot
    }

    /// The secret key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Remaining cooldown when every slot was cooling and this is the best-effort pick.
    ///
    /// Callers should wait this long before using the key.
    #[must_use]
    pub const fn cooling_for(&self) -> Option<Duration> {
        self.cooling_for
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("provider", &self.provider)
            .field("slot", &self.slot)
            .field("api_key", &"<redacted>")
            .field("cooling_for", &self.cooling_for)
            .finish()
    }
}
