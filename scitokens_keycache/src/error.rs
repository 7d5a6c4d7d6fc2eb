use std::{error::Error as StdError, io, path::PathBuf};

use aliri::jwt::IssuerRef;
use thiserror::Error;

/// A key set could not be retrieved from an issuer
#[derive(Debug, Error)]
#[error("unable to fetch JWKS for issuer `{issuer}`: {message}")]
pub struct FetchError {
    issuer: String,
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl FetchError {
    /// Constructs a new fetch error for the given issuer
    pub fn new(issuer: &IssuerRef, message: impl Into<String>) -> Self {
        Self {
            issuer: issuer.as_str().to_owned(),
            message: message.into(),
            source: None,
        }
    }

    /// Attaches the underlying cause of the failure
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The issuer whose keys could not be fetched
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// A description of what went wrong
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// An error raised by the key cache
#[derive(Debug, Error)]
pub enum KeyCacheError {
    /// Keys could not be fetched from the issuer
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The persistent store could not be read or written
    #[error("key cache storage failure at {}", path.display())]
    Io {
        /// The file or directory involved
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// A persisted cache entry could not be decoded
    #[error("corrupt key cache entry at {}", path.display())]
    CorruptEntry {
        /// The file holding the entry
        path: PathBuf,
        /// The decoding failure
        #[source]
        source: serde_json::Error,
    },

    /// The supplied document is not a valid JSON Web Key Set
    #[error("malformed JWKS document for issuer `{issuer}`")]
    MalformedJwks {
        /// The issuer the document was supplied for
        issuer: String,
        /// The decoding failure
        #[source]
        source: serde_json::Error,
    },

    /// The HTTP client used to fetch keys could not be initialized
    #[cfg(feature = "reqwest")]
    #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
    #[error("unable to initialize the HTTP client")]
    HttpClient(#[source] reqwest::Error),

    /// No key matching the requested key ID and algorithm is known
    #[error("no key for issuer `{issuer}` matches key ID {} with algorithm {alg}", kid.as_deref().unwrap_or("<none>"))]
    KeyNotFound {
        /// The token issuer
        issuer: String,
        /// The requested key ID, if any
        kid: Option<String>,
        /// The requested algorithm
        alg: String,
        /// The refresh failure that left the cache without a usable key set
        #[source]
        refresh: Option<FetchError>,
    },
}

impl KeyCacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed_jwks(issuer: &IssuerRef, source: serde_json::Error) -> Self {
        Self::MalformedJwks {
            issuer: issuer.as_str().to_owned(),
            source,
        }
    }
}
