//! Authorization credential store.

use parking_lot::RwLock;

/// Source of the bearer credential used by transports and HTTP calls.
///
/// Token issuance lives outside relaydeck; the store only hands out what it
/// was given and forgets it when the server rejects it.
pub trait CredentialStore: Send + Sync {
    fn token(&self) -> Option<String>;

    /// Called when the server answers `401`.
    fn clear_on_unauthorized(&self);
}

/// In-memory credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    token: RwLock<Option<String>>,
}

impl MemoryCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token.filter(|t| !t.is_empty())),
        }
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }
}

impl CredentialStore for MemoryCredentials {
    fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    fn clear_on_unauthorized(&self) {
        tracing::warn!("credential rejected by server, clearing");
        *self.token.write() = None;
    }
}
