use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use aliri_base64::Base64Url;
use aliri_braid::braid;
use aliri_clock::{Clock, System, UnixTime};
use keyward::SharedClock;
use rand::RngCore;

use crate::TokenRequestError;

const STATE_BYTES: usize = 16;
const DEFAULT_STATE_LIFETIME: Duration = Duration::from_secs(10 * 60);
const DEFAULT_MAX_PENDING: usize = 10_000;

/// An anti-forgery value tying an authorization callback to the request that
/// started it
#[braid(serde)]
pub struct AuthzState;

impl AuthzState {
    /// Generates a fresh random state value
    pub fn generate() -> Self {
        let mut raw = [0u8; STATE_BYTES];
        rand::thread_rng().fill_bytes(&mut raw);
        Self::new(Base64Url::from_raw(raw.to_vec()).to_string())
    }
}

/// Tracks issued authorization states so that each can be redeemed once
///
/// States are held in memory and expire after a fixed lifetime. At most
/// `max_pending` states are held at once; recording beyond that evicts the
/// oldest. Clones share the same underlying store.
#[derive(Clone)]
pub struct StateStore {
    issued: Arc<Mutex<Issued>>,
    lifetime: Duration,
    max_pending: usize,
    clock: SharedClock,
}

#[derive(Default)]
struct Issued {
    expiry: HashMap<AuthzState, UnixTime>,
    order: VecDeque<AuthzState>,
}

impl Issued {
    fn prune_expired(&mut self, now: UnixTime) {
        while let Some(oldest) = self.order.front() {
            match self.expiry.get(oldest) {
                Some(exp) if *exp >= now => break,
                Some(_) => {
                    self.expiry.remove(oldest);
                }
                None => {}
            }
            self.order.pop_front();
        }
    }

    fn evict_oldest(&mut self) -> bool {
        while let Some(oldest) = self.order.pop_front() {
            if self.expiry.remove(&oldest).is_some() {
                tracing::debug!("pending authorization states at capacity, evicting oldest");
                return true;
            }
        }
        false
    }

    fn insert(&mut self, state: AuthzState, expires: UnixTime, max_pending: usize) {
        // Redeemed states linger in `order` until they reach the front
        if self.order.len() > max_pending.saturating_mul(2) {
            let expiry = &self.expiry;
            self.order.retain(|s| expiry.contains_key(s));
        }

        while self.expiry.len() >= max_pending {
            if !self.evict_oldest() {
                break;
            }
        }

        if self.expiry.insert(state.clone(), expires).is_none() {
            self.order.push_back(state);
        }
    }
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self
            .issued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .expiry
            .len();
        f.debug_struct("StateStore")
            .field("pending", &pending)
            .field("lifetime", &self.lifetime)
            .field("max_pending", &self.max_pending)
            .finish_non_exhaustive()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    /// Constructs an empty store with a ten minute state lifetime, holding at
    /// most 10,000 pending states
    pub fn new() -> Self {
        Self {
            issued: Arc::new(Mutex::new(Issued::default())),
            lifetime: DEFAULT_STATE_LIFETIME,
            max_pending: DEFAULT_MAX_PENDING,
            clock: Arc::new(System),
        }
    }

    /// Sets how many unredeemed states may be held before the oldest are
    /// evicted
    ///
    /// A limit of zero is treated as one.
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending.max(1);
        self
    }

    /// Sets how long an issued state may be redeemed
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Uses the given clock to judge expiry
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Records a state as issued
    pub fn record(&self, state: AuthzState) {
        let now = self.clock.now();
        let expires = UnixTime(now.0.saturating_add(self.lifetime.as_secs()));

        let mut issued = self.issued.lock().unwrap_or_else(PoisonError::into_inner);
        issued.prune_expired(now);
        issued.insert(state, expires, self.max_pending);
    }

    /// Redeems a previously issued state
    ///
    /// A state can only be redeemed once.
    ///
    /// # Errors
    ///
    /// Returns [`TokenRequestError::InvalidState`] if the state was never
    /// issued, was already redeemed, or has expired.
    pub fn consume(&self, state: &AuthzStateRef) -> Result<(), TokenRequestError> {
        let now = self.clock.now();
        let expires = self
            .issued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .expiry
            .remove(state);

        match expires {
            Some(exp) if exp >= now => Ok(()),
            Some(_) => {
                tracing::debug!("authorization state has expired");
                Err(TokenRequestError::InvalidState)
            }
            None => {
                tracing::debug!("authorization state is unknown or already used");
                Err(TokenRequestError::InvalidState)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    #[derive(Debug)]
    struct SteppingClock(AtomicU64);

    impl Clock for SteppingClock {
        fn now(&self) -> UnixTime {
            UnixTime(self.0.load(Ordering::SeqCst))
        }
    }

    #[test]
    fn generated_states_are_url_safe_and_distinct() {
        let a = AuthzState::generate();
        let b = AuthzState::generate();

        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 22);
        assert!(a
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn issued_state_is_redeemed_once() {
        let store = StateStore::new();
        let state = AuthzState::generate();
        store.record(state.clone());

        assert!(store.consume(&state).is_ok());
        assert!(matches!(
            store.consume(&state),
            Err(TokenRequestError::InvalidState)
        ));
    }

    #[test]
    fn unknown_state_is_rejected() {
        let store = StateStore::new();

        assert!(matches!(
            store.consume(AuthzStateRef::from_str("forged")),
            Err(TokenRequestError::InvalidState)
        ));
    }

    #[test]
    fn expired_state_is_rejected() {
        let clock = Arc::new(SteppingClock(AtomicU64::new(1_000)));
        let store = StateStore::new()
            .with_lifetime(Duration::from_secs(60))
            .with_clock(clock.clone());
        let state = AuthzState::generate();
        store.record(state.clone());

        clock.0.store(1_061, Ordering::SeqCst);

        assert!(matches!(
            store.consume(&state),
            Err(TokenRequestError::InvalidState)
        ));
    }

    #[test]
    fn oldest_states_are_evicted_at_capacity() {
        let store = StateStore::new().with_max_pending(2);
        let first = AuthzState::generate();
        let second = AuthzState::generate();
        let third = AuthzState::generate();

        store.record(first.clone());
        store.record(second.clone());
        store.record(third.clone());

        assert!(matches!(
            store.consume(&first),
            Err(TokenRequestError::InvalidState)
        ));
        assert!(store.consume(&second).is_ok());
        assert!(store.consume(&third).is_ok());
    }

    #[test]
    fn redeemed_states_free_capacity() {
        let store = StateStore::new().with_max_pending(2);
        let first = AuthzState::generate();
        let second = AuthzState::generate();
        store.record(first.clone());
        store.record(second.clone());
        assert!(store.consume(&first).is_ok());

        let third = AuthzState::generate();
        store.record(third.clone());

        assert!(store.consume(&second).is_ok());
        assert!(store.consume(&third).is_ok());
    }

    #[test]
    fn pending_states_never_exceed_capacity() {
        let store = StateStore::new().with_max_pending(16);
        for _ in 0..1_000 {
            store.record(AuthzState::generate());
        }

        let issued = store.issued.lock().unwrap();
        assert_eq!(issued.expiry.len(), 16);
        assert!(issued.order.len() <= 32);
    }
}
