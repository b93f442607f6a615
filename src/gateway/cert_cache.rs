//! Time-boxed cache of the provider's platform certificates.
//!
//! Providers rotate the public certificate that signs their callbacks.
//! The cache keeps the current certificates keyed by serial number for a
//! bounded time; a verification failure against a cached certificate is
//! treated as a rotation signal and triggers one refresh before the
//! signature is declared genuinely invalid.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rsa::RsaPublicKey;

/// How long a fetched certificate stays fresh.
const CACHE_TTL_MINUTES: i64 = 10;

/// Result of a cache lookup.
#[derive(Debug, PartialEq)]
pub enum CacheLookup {
    /// Certificate present and within TTL.
    Fresh(RsaPublicKey),
    /// Certificate present but older than the TTL; refetch before use.
    Stale,
    /// Serial unknown; refetch.
    Missing,
}

struct Entry {
    key: RsaPublicKey,
    fetched_at: DateTime<Utc>,
}

/// Serial-keyed certificate cache with a fixed TTL.
///
/// Interior mutability so one cache can be shared across request
/// handlers; the lock is held only for map access, never across I/O.
pub struct CertificateCache {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
}

impl Default for CertificateCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CertificateCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: Duration::minutes(CACHE_TTL_MINUTES),
        }
    }

    /// Look up a certificate by serial.
    pub fn lookup(&self, serial: &str) -> CacheLookup {
        self.lookup_at(serial, Utc::now())
    }

    fn lookup_at(&self, serial: &str, now: DateTime<Utc>) -> CacheLookup {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(serial) {
            Some(entry) if now - entry.fetched_at <= self.ttl => {
                CacheLookup::Fresh(entry.key.clone())
            }
            Some(_) => CacheLookup::Stale,
            None => CacheLookup::Missing,
        }
    }

    /// Store a freshly fetched certificate set, replacing prior entries.
    ///
    /// Replacement (not merge) so rotated-out serials disappear with the
    /// rotation instead of lingering until their TTL.
    pub fn replace(&self, certs: Vec<(String, RsaPublicKey)>) {
        self.replace_at(certs, Utc::now());
    }

    fn replace_at(&self, certs: Vec<(String, RsaPublicKey)>, now: DateTime<Utc>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.clear();
        for (serial, key) in certs {
            entries.insert(
                serial,
                Entry {
                    key,
                    fetched_at: now,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::signing::{load_public_key, test_keys::PUBLIC_PEM};

    fn key() -> RsaPublicKey {
        load_public_key(PUBLIC_PEM).unwrap()
    }

    #[test]
    fn fresh_within_ttl() {
        let cache = CertificateCache::new();
        let now = Utc::now();
        cache.replace_at(vec![("S1".to_string(), key())], now);

        match cache.lookup_at("S1", now + Duration::minutes(9)) {
            CacheLookup::Fresh(_) => {}
            other => panic!("expected fresh, got {:?}", other),
        }
    }

    #[test]
    fn stale_after_ttl() {
        let cache = CertificateCache::new();
        let now = Utc::now();
        cache.replace_at(vec![("S1".to_string(), key())], now);

        assert_eq!(
            cache.lookup_at("S1", now + Duration::minutes(11)),
            CacheLookup::Stale
        );
    }

    #[test]
    fn unknown_serial_is_missing() {
        let cache = CertificateCache::new();
        assert_eq!(cache.lookup("S9"), CacheLookup::Missing);
    }

    #[test]
    fn replace_drops_rotated_out_serials() {
        let cache = CertificateCache::new();
        let now = Utc::now();
        cache.replace_at(vec![("S1".to_string(), key())], now);
        cache.replace_at(vec![("S2".to_string(), key())], now);

        assert_eq!(cache.lookup_at("S1", now), CacheLookup::Missing);
        assert!(matches!(cache.lookup_at("S2", now), CacheLookup::Fresh(_)));
    }
}
