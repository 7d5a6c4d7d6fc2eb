//! Per-issuer JSON Web Key Set cache for SciTokens
//!
//! A [`KeyCache`] holds the public signing keys published by each token
//! issuer. Entries carry two deadlines: a _next update_ time, after which a
//! background-friendly soft refresh is attempted while the cached keys remain
//! usable, and an _expiration_ time, after which the cached keys are no
//! longer trusted and a refresh is required.
//!
//! Entries can be persisted through a [`KeyStore`]. The provided
//! [`FileStore`] keeps one JSON document per issuer in the user's cache
//! directory, replacing files atomically so that concurrent processes never
//! observe a partially written entry.
//!
//! Keys are fetched through a [`JwksFetcher`]. With the `reqwest` feature
//! enabled, [`HttpFetcher`] discovers the issuer's `jwks_uri` through its
//! OpenID Connect or OAuth 2.0 authorization server metadata.
//!
//! ```
//! use aliri::jwt::IssuerRef;
//! use scitokens_keycache::KeyCache;
//!
//! # fn main() -> Result<(), scitokens_keycache::KeyCacheError> {
//! let cache = KeyCache::in_memory();
//! let issuer = IssuerRef::from_str("https://demo.scitokens.org");
//!
//! cache.set_jwks(issuer, r#"{"keys":[]}"#)?;
//! assert_eq!(cache.get_cached_jwks(issuer)?, r#"{"keys":[]}"#);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod cache;
mod entry;
mod error;
mod fetch;
mod store;

pub use cache::{KeyCache, KeyCacheBuilder, KeyCacheConfig};
pub use entry::KeyCacheEntry;
pub use error::{FetchError, KeyCacheError};
#[cfg(feature = "reqwest")]
pub use fetch::HttpFetcher;
pub use fetch::{FetchedJwks, JwksFetcher};
pub use store::{FileStore, KeyStore};

/// The serialized form of a key set with no keys
pub const EMPTY_JWKS: &str = r#"{"keys":[]}"#;
