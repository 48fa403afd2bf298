use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use aliri::{jwa, jwk, jwt, Jwk, Jwks, Jwt};
use aliri_clock::{Clock, UnixTime};
use serde::Serialize;

/// A clock that only moves when told to, shared between clones
#[derive(Clone, Debug, Default)]
pub(crate) struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub(crate) fn at(secs: u64) -> Self {
        Self(Arc::new(AtomicU64::new(secs)))
    }

    pub(crate) fn set(&self, secs: u64) {
        self.0.store(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> UnixTime {
        UnixTime(self.0.load(Ordering::SeqCst))
    }
}

pub(crate) fn signing_key(kid: &str) -> color_eyre::Result<Jwk> {
    Ok(Jwk::from(jwa::Rsa::generate()?)
        .with_algorithm(jwa::Algorithm::RS256)
        .with_key_id(jwk::KeyId::from(kid)))
}

pub(crate) fn public_jwks(keys: &[Jwk]) -> Jwks {
    let mut jwks = Jwks::default();
    for key in keys {
        jwks.add_key(key.clone().public_only());
    }
    jwks
}

pub(crate) fn sign<C: Serialize>(key: &Jwk, kid: &str, claims: &C) -> color_eyre::Result<Jwt> {
    let headers = jwt::BasicHeaders::with_key_id(jwa::Algorithm::RS256, jwk::KeyId::from(kid));
    Ok(Jwt::try_from_parts_with_signature(&headers, claims, key)?)
}
