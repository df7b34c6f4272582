//! Short-lived cache in front of the auth session lookup.

use std::{sync::Arc, time::Duration};

use tokio::{sync::Mutex, time::Instant};

use crate::{errors::Result, BoxFuture};

/// How long a session lookup (successful or not) is reused.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30);

/// Source of the current user's bearer token.
///
/// `Ok(None)` means "signed out"; requests are then sent without credentials.
pub trait SessionProvider: Send + Sync + 'static {
    fn access_token(&self) -> BoxFuture<'_, Result<Option<String>>>;
}

struct CachedLookup {
    fetched_at: Instant,
    outcome: Result<Option<String>>,
}

/// Caches the provider's answer, including failures, for a fixed TTL.
pub struct SessionCache {
    provider: Arc<dyn SessionProvider>,
    ttl: Duration,
    slot: Mutex<Option<CachedLookup>>,
}

impl SessionCache {
    pub fn new(provider: Arc<dyn SessionProvider>) -> Self {
        Self::with_ttl(provider, DEFAULT_SESSION_TTL)
    }

    pub fn with_ttl(provider: Arc<dyn SessionProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Current token, asking the provider at most once per TTL window.
    pub async fn access_token(&self) -> Result<Option<String>> {
        let mut slot = self.slot.lock().await;
        if let Some(cached) = slot.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return match &cached.outcome {
                    Ok(token) => Ok(token.clone()),
                    Err(err) => Err(err.duplicate()),
                };
            }
        }

        let outcome = self.provider.access_token().await;
        #[cfg(feature = "tracing")]
        if let Err(err) = &outcome {
            tracing::warn!(error = %err, "session lookup failed; caching failure");
        }
        let result = match &outcome {
            Ok(token) => Ok(token.clone()),
            Err(err) => Err(err.duplicate()),
        };
        *slot = Some(CachedLookup {
            fetched_at: Instant::now(),
            outcome,
        });
        result
    }

    /// Drop the cached lookup (e.g. after sign-in or sign-out).
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}
