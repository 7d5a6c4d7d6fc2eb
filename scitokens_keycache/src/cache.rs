use std::{collections::HashMap, sync::Arc, time::Duration};

use aliri::{
    jwa,
    jwk::KeyIdRef,
    jwt::{Issuer, IssuerRef},
    Jwk,
};
use aliri_clock::{Clock, System, UnixTime};
use arc_swap::ArcSwap;

use crate::{
    FetchError, FileStore, JwksFetcher, KeyCacheEntry, KeyCacheError, KeyStore, EMPTY_JWKS,
};

/// Scheduling policy for cached key sets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyCacheConfig {
    update_interval: Duration,
    expiration_interval: Duration,
}

impl Default for KeyCacheConfig {
    fn default() -> Self {
        Self {
            update_interval: Self::DEFAULT_UPDATE_INTERVAL,
            expiration_interval: Self::DEFAULT_EXPIRATION_INTERVAL,
        }
    }
}

impl KeyCacheConfig {
    /// Time until a soft refresh is attempted when the issuer gives no caching directive
    pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(600);

    /// Minimum time until cached keys expire
    pub const DEFAULT_EXPIRATION_INTERVAL: Duration = Duration::from_secs(4 * 24 * 60 * 60);

    /// Sets the time until a soft refresh is attempted
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    /// Sets the minimum time until cached keys expire
    pub fn with_expiration_interval(mut self, interval: Duration) -> Self {
        self.expiration_interval = interval;
        self
    }

    /// The time until a soft refresh is attempted
    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    /// The minimum time until cached keys expire
    pub fn expiration_interval(&self) -> Duration {
        self.expiration_interval
    }

    /// Computes the next update and expiration deadlines for keys obtained at `now`
    ///
    /// An issuer-supplied `max_age` replaces the update interval and extends
    /// the expiration when it exceeds the configured expiration interval.
    pub fn schedule(&self, now: UnixTime, max_age: Option<Duration>) -> (UnixTime, UnixTime) {
        let update = max_age.unwrap_or(self.update_interval);
        let expiration = update.max(self.expiration_interval);

        (
            UnixTime(now.0.saturating_add(update.as_secs())),
            UnixTime(now.0.saturating_add(expiration.as_secs())),
        )
    }
}

#[derive(Debug)]
struct Inner {
    entries: ArcSwap<HashMap<Issuer, Arc<KeyCacheEntry>>>,
    store: Option<Box<dyn KeyStore>>,
    fetcher: Option<Box<dyn JwksFetcher>>,
    config: KeyCacheConfig,
}

/// A shared, thread-safe cache of issuer key sets
///
/// Cloning a `KeyCache` yields another handle to the same cache. Lookups
/// are served from memory when possible and fall back to the configured
/// [`KeyStore`]. Updates are written through to the store before becoming
/// visible in memory.
#[derive(Clone, Debug)]
#[must_use]
pub struct KeyCache {
    inner: Arc<Inner>,
}

/// Builds a [`KeyCache`]
#[derive(Debug, Default)]
#[must_use]
pub struct KeyCacheBuilder {
    store: Option<Box<dyn KeyStore>>,
    fetcher: Option<Box<dyn JwksFetcher>>,
    config: KeyCacheConfig,
}

impl KeyCacheBuilder {
    /// Persists entries in `store`
    pub fn with_store(mut self, store: impl KeyStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Retrieves key sets using `fetcher`
    pub fn with_fetcher(mut self, fetcher: impl JwksFetcher + 'static) -> Self {
        self.fetcher = Some(Box::new(fetcher));
        self
    }

    /// Uses the given scheduling policy
    pub fn with_config(mut self, config: KeyCacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Constructs the cache
    pub fn build(self) -> KeyCache {
        KeyCache {
            inner: Arc::new(Inner {
                entries: ArcSwap::from_pointee(HashMap::new()),
                store: self.store,
                fetcher: self.fetcher,
                config: self.config,
            }),
        }
    }
}

impl KeyCache {
    /// Starts building a new key cache
    pub fn builder() -> KeyCacheBuilder {
        KeyCacheBuilder::default()
    }

    /// A cache with no persistence and no ability to fetch keys
    pub fn in_memory() -> Self {
        Self::builder().build()
    }

    /// A cache persisted in the user's cache directory
    ///
    /// When the `reqwest` feature is enabled, missing or stale key sets are
    /// fetched from the issuer.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be determined or the
    /// HTTP client cannot be initialized.
    pub fn user_default() -> Result<Self, KeyCacheError> {
        let builder = Self::builder().with_store(FileStore::user_default()?);

        #[cfg(feature = "reqwest")]
        let builder =
            builder.with_fetcher(crate::HttpFetcher::new().map_err(KeyCacheError::HttpClient)?);

        Ok(builder.build())
    }

    /// The scheduling policy of this cache
    pub fn config(&self) -> &KeyCacheConfig {
        &self.inner.config
    }

    /// Returns the cached key set document for `issuer`
    ///
    /// No fetch is attempted. When the issuer is unknown or its keys have
    /// expired, an empty key set is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent store could not be read.
    pub fn get_cached_jwks(&self, issuer: &IssuerRef) -> Result<String, KeyCacheError> {
        self.get_cached_jwks_with_clock(issuer, &System)
    }

    /// Returns the cached key set document for `issuer` as seen by `clock`
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent store could not be read.
    pub fn get_cached_jwks_with_clock<C: Clock>(
        &self,
        issuer: &IssuerRef,
        clock: &C,
    ) -> Result<String, KeyCacheError> {
        let now = clock.now();
        match self.lookup(issuer, now)? {
            Some(entry) => Ok(entry.document().to_string()),
            None => Ok(EMPTY_JWKS.to_owned()),
        }
    }

    /// Fetches the current key set for `issuer` and replaces the cached entry
    ///
    /// On failure the cached entry is left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if no fetcher is configured, the fetch fails, the
    /// response is not a key set, or the entry could not be persisted.
    pub fn refresh_jwks(&self, issuer: &IssuerRef) -> Result<(), KeyCacheError> {
        self.refresh_with_clock(issuer, &System).map(|_| ())
    }

    /// Fetches the current key set for `issuer` as seen by `clock`
    ///
    /// # Errors
    ///
    /// See [`refresh_jwks`][Self::refresh_jwks].
    pub fn refresh_with_clock<C: Clock>(
        &self,
        issuer: &IssuerRef,
        clock: &C,
    ) -> Result<Arc<KeyCacheEntry>, KeyCacheError> {
        self.refresh_at(issuer, clock.now())
    }

    #[tracing::instrument(skip(self), fields(issuer = %issuer))]
    fn refresh_at(
        &self,
        issuer: &IssuerRef,
        now: UnixTime,
    ) -> Result<Arc<KeyCacheEntry>, KeyCacheError> {
        let fetcher = self
            .inner
            .fetcher
            .as_deref()
            .ok_or_else(|| FetchError::new(issuer, "no JWKS fetcher is configured"))?;

        tracing::debug!("refreshing JWKS");
        let fetched = fetcher.fetch(issuer).map_err(|err| {
            let error: &dyn std::error::Error = &err;
            tracing::warn!(error, "JWKS refresh failed");
            err
        })?;

        let (next_update, expires) = self.inner.config.schedule(now, fetched.max_age);
        let entry = KeyCacheEntry::from_document(issuer, &fetched.document, next_update, expires)
            .map_err(|err| {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(error, "JWKS refresh failed; response is not a key set");
                FetchError::new(issuer, "response is not a JSON Web Key Set").with_source(err)
            })?;

        let entry = self.replace(entry)?;
        tracing::info!(keys = entry.keys().keys().len(), "JWKS refreshed");
        Ok(entry)
    }

    /// Replaces the cached key set for `issuer` with `document`
    ///
    /// The entry is scheduled as though it had just been fetched with no
    /// caching directive.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a key set or the entry could
    /// not be persisted.
    pub fn set_jwks(&self, issuer: &IssuerRef, document: &str) -> Result<(), KeyCacheError> {
        self.set_jwks_with_clock(issuer, document, &System)
    }

    /// Replaces the cached key set for `issuer` as seen by `clock`
    ///
    /// # Errors
    ///
    /// See [`set_jwks`][Self::set_jwks].
    pub fn set_jwks_with_clock<C: Clock>(
        &self,
        issuer: &IssuerRef,
        document: &str,
        clock: &C,
    ) -> Result<(), KeyCacheError> {
        let (next_update, expires) = self.inner.config.schedule(clock.now(), None);
        let entry = KeyCacheEntry::from_document(issuer, document, next_update, expires)
            .map_err(|source| KeyCacheError::malformed_jwks(issuer, source))?;

        self.replace(entry)?;
        tracing::debug!(%issuer, "JWKS set explicitly");
        Ok(())
    }

    /// Adds a public key to the cached key set of `issuer`
    ///
    /// Any existing key with the same key ID is replaced. Private key
    /// material is never stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the cached entry could not be read or the updated
    /// entry could not be persisted.
    pub fn store_public_key(&self, issuer: &IssuerRef, key: &Jwk) -> Result<(), KeyCacheError> {
        self.store_public_key_with_clock(issuer, key, &System)
    }

    /// Adds a public key to the cached key set of `issuer` as seen by `clock`
    ///
    /// # Errors
    ///
    /// See [`store_public_key`][Self::store_public_key].
    pub fn store_public_key_with_clock<C: Clock>(
        &self,
        issuer: &IssuerRef,
        key: &Jwk,
        clock: &C,
    ) -> Result<(), KeyCacheError> {
        let now = clock.now();
        let public = serde_json::to_value(key.clone().public_only())
            .map_err(|source| KeyCacheError::malformed_jwks(issuer, source))?;

        let mut keys = match self.lookup(issuer, now)? {
            Some(entry) => entry
                .document()
                .get("keys")
                .and_then(serde_json::Value::as_array)
                .cloned()
                .unwrap_or_default(),
            None => Vec::new(),
        };

        if let Some(kid) = key.key_id() {
            keys.retain(|existing| {
                existing.get("kid").and_then(serde_json::Value::as_str) != Some(kid.as_str())
            });
        }
        keys.push(public);

        let (next_update, expires) = self.inner.config.schedule(now, None);
        let entry = KeyCacheEntry::from_value(
            issuer,
            serde_json::json!({ "keys": keys }),
            next_update,
            expires,
        )
        .map_err(|source| KeyCacheError::malformed_jwks(issuer, source))?;

        self.replace(entry)?;
        tracing::debug!(%issuer, kid = ?key.key_id(), "public key stored");
        Ok(())
    }

    /// Finds the key to verify a token from `issuer`
    ///
    /// A soft refresh is attempted when the cached entry is due for an
    /// update; if it fails, the cached keys continue to be used. When no
    /// unexpired entry exists, a refresh is required. Refreshes only happen
    /// when `allow_refresh` is set.
    ///
    /// # Errors
    ///
    /// Returns [`KeyCacheError::KeyNotFound`] if no usable key matches, or a
    /// storage error if the persistent store could not be accessed.
    #[tracing::instrument(level = "debug", skip(self, kid), fields(issuer = %issuer))]
    pub fn resolve_key(
        &self,
        issuer: &IssuerRef,
        kid: Option<&KeyIdRef>,
        alg: jwa::Algorithm,
        now: UnixTime,
        allow_refresh: bool,
    ) -> Result<Jwk, KeyCacheError> {
        let mut entry = self.lookup(issuer, now)?;
        let mut refresh_failure = None;

        match entry.as_ref().map(|e| e.needs_update(now)) {
            None if allow_refresh => match self.refresh_at(issuer, now) {
                Ok(refreshed) => entry = Some(refreshed),
                Err(KeyCacheError::Fetch(err)) => refresh_failure = Some(err),
                Err(err) => return Err(err),
            },
            Some(true) if allow_refresh => match self.refresh_at(issuer, now) {
                Ok(refreshed) => entry = Some(refreshed),
                Err(err) => {
                    let error: &dyn std::error::Error = &err;
                    tracing::warn!(error, "soft refresh failed; using cached keys");
                }
            },
            _ => {}
        }

        entry
            .as_ref()
            .and_then(|entry| entry.keys().get_key_by_opt(kid, alg))
            .cloned()
            .ok_or_else(|| {
                if let Some(kid) = kid {
                    tracing::debug!(%kid, %alg, "unable to find matching key");
                } else {
                    tracing::debug!(%alg, "unable to find matching key");
                }
                KeyCacheError::KeyNotFound {
                    issuer: issuer.as_str().to_owned(),
                    kid: kid.map(|kid| kid.as_str().to_owned()),
                    alg: alg.to_string(),
                    refresh: refresh_failure,
                }
            })
    }

    fn lookup(
        &self,
        issuer: &IssuerRef,
        now: UnixTime,
    ) -> Result<Option<Arc<KeyCacheEntry>>, KeyCacheError> {
        let cached = self.inner.entries.load().get(issuer).cloned();
        if let Some(entry) = cached.filter(|entry| !entry.is_expired(now)) {
            return Ok(Some(entry));
        }

        let Some(store) = &self.inner.store else {
            return Ok(None);
        };

        match store.load(issuer)? {
            Some(stored) if !stored.is_expired(now) => {
                let stored = Arc::new(stored);
                self.install(Arc::clone(&stored));
                Ok(Some(stored))
            }
            _ => Ok(None),
        }
    }

    fn replace(&self, entry: KeyCacheEntry) -> Result<Arc<KeyCacheEntry>, KeyCacheError> {
        if let Some(store) = &self.inner.store {
            store.store(&entry)?;
        }

        let entry = Arc::new(entry);
        self.install(Arc::clone(&entry));
        Ok(entry)
    }

    fn install(&self, entry: Arc<KeyCacheEntry>) {
        self.inner.entries.rcu(|entries| {
            let mut entries = HashMap::clone(entries);
            entries.insert(entry.issuer().to_owned(), Arc::clone(&entry));
            entries
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use aliri::{jwk::KeyId, Jwks};
    use aliri_clock::{DurationSecs, TestClock};
    use color_eyre::Result;

    use super::*;
    use crate::FetchedJwks;

    const ISSUER: &str = "https://issuer.example.org";
    const START: UnixTime = UnixTime(1_000_000);

    #[derive(Debug, Default)]
    struct StubFetcher {
        document: Option<String>,
        max_age: Option<Duration>,
        calls: AtomicUsize,
    }

    impl StubFetcher {
        fn serving(document: String) -> Arc<Self> {
            Arc::new(Self {
                document: Some(document),
                ..Self::default()
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl JwksFetcher for StubFetcher {
        fn fetch(&self, issuer: &IssuerRef) -> Result<FetchedJwks, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let document = self
                .document
                .clone()
                .ok_or_else(|| FetchError::new(issuer, "issuer unreachable"))?;

            Ok(FetchedJwks {
                document,
                max_age: self.max_age,
            })
        }
    }

    fn issuer() -> &'static IssuerRef {
        IssuerRef::from_str(ISSUER)
    }

    fn signing_key(kid: &str) -> Result<Jwk> {
        let key = jwa::rsa::PrivateKey::generate()?;
        Ok(Jwk::from(key)
            .with_algorithm(jwa::Algorithm::RS256)
            .with_key_id(KeyId::from(kid)))
    }

    fn jwks_document(keys: &[&Jwk]) -> Result<String> {
        let mut jwks = Jwks::default();
        for key in keys {
            jwks.add_key((*key).clone().public_only());
        }
        Ok(serde_json::to_string(&jwks)?)
    }

    fn kid(kid: &str) -> &KeyIdRef {
        KeyIdRef::from_str(kid)
    }

    #[test]
    fn unknown_issuer_has_empty_key_set() -> Result<()> {
        let cache = KeyCache::in_memory();
        assert_eq!(cache.get_cached_jwks(issuer())?, EMPTY_JWKS);
        Ok(())
    }

    #[test]
    fn set_jwks_rejects_malformed_documents() {
        let cache = KeyCache::in_memory();
        let err = cache.set_jwks(issuer(), "{\"not\": \"a key set\"}").unwrap_err();
        assert!(matches!(err, KeyCacheError::MalformedJwks { .. }));
    }

    #[test]
    fn default_schedule() {
        let config = KeyCacheConfig::default();
        let (next_update, expires) = config.schedule(START, None);

        assert_eq!(next_update, UnixTime(START.0 + 600));
        assert_eq!(expires, UnixTime(START.0 + 4 * 24 * 60 * 60));
    }

    #[test]
    fn max_age_drives_schedule() {
        let config = KeyCacheConfig::default();

        let (next_update, expires) = config.schedule(START, Some(Duration::from_secs(300)));
        assert_eq!(next_update, UnixTime(START.0 + 300));
        assert_eq!(expires, UnixTime(START.0 + 4 * 24 * 60 * 60));

        let ten_days = Duration::from_secs(10 * 24 * 60 * 60);
        let (next_update, expires) = config.schedule(START, Some(ten_days));
        assert_eq!(next_update, UnixTime(START.0 + ten_days.as_secs()));
        assert_eq!(expires, next_update);
    }

    #[test]
    fn cached_jwks_expire() -> Result<()> {
        let cache = KeyCache::in_memory();
        cache.set_jwks_with_clock(issuer(), r#"{"keys":[]}"#, &TestClock::new(START))?;

        let mut clock = TestClock::new(START);
        clock.advance(DurationSecs(KeyCacheConfig::DEFAULT_EXPIRATION_INTERVAL.as_secs() - 1));
        assert_eq!(cache.get_cached_jwks_with_clock(issuer(), &clock)?, r#"{"keys":[]}"#);

        clock.advance(DurationSecs(1));
        assert_eq!(cache.get_cached_jwks_with_clock(issuer(), &clock)?, EMPTY_JWKS);
        Ok(())
    }

    #[test]
    fn returns_document_as_published() -> Result<()> {
        let cache = KeyCache::in_memory();
        let document = r#"{"keys":[],"issuer_note":"kept"}"#;
        cache.set_jwks(issuer(), document)?;

        let cached: serde_json::Value = serde_json::from_str(&cache.get_cached_jwks(issuer())?)?;
        assert_eq!(cached["issuer_note"], "kept");
        Ok(())
    }

    #[test]
    #[tracing_test::traced_test]
    fn missing_keys_are_fetched_once() -> Result<()> {
        let key = signing_key("k1")?;
        let fetcher = StubFetcher::serving(jwks_document(&[&key])?);
        let cache = KeyCache::builder().with_fetcher(Arc::clone(&fetcher)).build();

        let found = cache.resolve_key(issuer(), Some(kid("k1")), jwa::Algorithm::RS256, START, true)?;
        assert_eq!(found.key_id(), Some(kid("k1")));

        let again = cache.resolve_key(
            issuer(),
            Some(kid("k1")),
            jwa::Algorithm::RS256,
            UnixTime(START.0 + 1),
            true,
        )?;
        assert_eq!(again, found);
        assert_eq!(fetcher.calls(), 1);
        assert!(logs_contain("JWKS refreshed"));
        Ok(())
    }

    #[test]
    fn no_fetch_when_refresh_disallowed() -> Result<()> {
        let key = signing_key("k1")?;
        let fetcher = StubFetcher::serving(jwks_document(&[&key])?);
        let cache = KeyCache::builder().with_fetcher(Arc::clone(&fetcher)).build();

        let err = cache
            .resolve_key(issuer(), Some(kid("k1")), jwa::Algorithm::RS256, START, false)
            .unwrap_err();

        assert!(matches!(err, KeyCacheError::KeyNotFound { refresh: None, .. }));
        assert_eq!(fetcher.calls(), 0);
        Ok(())
    }

    #[test]
    fn stale_keys_trigger_soft_refresh() -> Result<()> {
        let old = signing_key("old")?;
        let new = signing_key("new")?;
        let fetcher = StubFetcher::serving(jwks_document(&[&new])?);
        let cache = KeyCache::builder().with_fetcher(Arc::clone(&fetcher)).build();
        cache.set_jwks_with_clock(issuer(), &jwks_document(&[&old])?, &TestClock::new(START))?;

        let later = UnixTime(START.0 + 601);
        let found = cache.resolve_key(issuer(), Some(kid("new")), jwa::Algorithm::RS256, later, true)?;

        assert_eq!(found.key_id(), Some(kid("new")));
        assert_eq!(fetcher.calls(), 1);
        Ok(())
    }

    #[test]
    #[tracing_test::traced_test]
    fn failed_soft_refresh_keeps_cached_keys() -> Result<()> {
        let key = signing_key("k1")?;
        let fetcher = StubFetcher::failing();
        let cache = KeyCache::builder().with_fetcher(Arc::clone(&fetcher)).build();
        cache.set_jwks_with_clock(issuer(), &jwks_document(&[&key])?, &TestClock::new(START))?;

        let later = UnixTime(START.0 + 601);
        let found = cache.resolve_key(issuer(), Some(kid("k1")), jwa::Algorithm::RS256, later, true)?;

        assert_eq!(found.key_id(), Some(kid("k1")));
        assert_eq!(fetcher.calls(), 1);
        assert!(logs_contain("soft refresh failed"));
        Ok(())
    }

    #[test]
    fn expired_keys_require_refresh() -> Result<()> {
        let key = signing_key("k1")?;
        let fetcher = StubFetcher::failing();
        let cache = KeyCache::builder().with_fetcher(Arc::clone(&fetcher)).build();
        cache.set_jwks_with_clock(issuer(), &jwks_document(&[&key])?, &TestClock::new(START))?;

        let expired = UnixTime(START.0 + KeyCacheConfig::DEFAULT_EXPIRATION_INTERVAL.as_secs());
        let err = cache
            .resolve_key(issuer(), Some(kid("k1")), jwa::Algorithm::RS256, expired, true)
            .unwrap_err();

        assert!(matches!(err, KeyCacheError::KeyNotFound { refresh: Some(_), .. }));
        Ok(())
    }

    #[test]
    fn store_public_key_replaces_same_key_id() -> Result<()> {
        let cache = KeyCache::in_memory();
        let first = signing_key("k1")?;
        let second = signing_key("k1")?;
        let other = signing_key("k2")?;

        cache.store_public_key(issuer(), &first)?;
        cache.store_public_key(issuer(), &other)?;
        cache.store_public_key(issuer(), &second)?;

        let jwks: Jwks = serde_json::from_str(&cache.get_cached_jwks(issuer())?)?;
        assert_eq!(jwks.keys().len(), 2);

        let stored = jwks
            .get_key_by_id(kid("k1"), jwa::Algorithm::RS256)
            .expect("k1 should be present");
        assert_eq!(stored, &second.clone().public_only());
        Ok(())
    }

    #[test]
    fn store_public_key_never_persists_private_material() -> Result<()> {
        let cache = KeyCache::in_memory();
        cache.store_public_key(issuer(), &signing_key("k1")?)?;

        let document: serde_json::Value = serde_json::from_str(&cache.get_cached_jwks(issuer())?)?;
        assert!(document["keys"][0].get("d").is_none());
        Ok(())
    }

    #[test]
    fn entries_are_shared_through_the_file_store() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let writer = KeyCache::builder()
            .with_store(FileStore::new(dir.path()))
            .build();
        let reader = KeyCache::builder()
            .with_store(FileStore::new(dir.path()))
            .build();

        let key = signing_key("k1")?;
        let document = jwks_document(&[&key])?;
        writer.set_jwks_with_clock(issuer(), &document, &TestClock::new(START))?;

        let found = reader.resolve_key(issuer(), Some(kid("k1")), jwa::Algorithm::RS256, START, false)?;
        assert_eq!(found.key_id(), Some(kid("k1")));

        let expired = TestClock::new(UnixTime(
            START.0 + KeyCacheConfig::DEFAULT_EXPIRATION_INTERVAL.as_secs(),
        ));
        let fresh_reader = KeyCache::builder()
            .with_store(FileStore::new(dir.path()))
            .build();
        assert_eq!(fresh_reader.get_cached_jwks_with_clock(issuer(), &expired)?, EMPTY_JWKS);
        Ok(())
    }

    #[test]
    fn handles_are_shared_across_threads() -> Result<()> {
        let cache = KeyCache::in_memory();
        let key = signing_key("k1")?;
        let document = jwks_document(&[&key])?;

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let document = document.clone();
                std::thread::spawn(move || cache.set_jwks(IssuerRef::from_str(ISSUER), &document))
            })
            .collect();

        for handle in handles {
            handle.join().expect("thread panicked")?;
        }

        assert_ne!(cache.get_cached_jwks(issuer())?, EMPTY_JWKS);
        Ok(())
    }
}
