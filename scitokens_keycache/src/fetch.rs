use std::{fmt, sync::Arc, time::Duration};

use aliri::jwt::IssuerRef;

use crate::FetchError;

/// A key set document as retrieved from an issuer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedJwks {
    /// The serialized JSON Web Key Set
    pub document: String,
    /// How long the issuer allows the document to be cached, if stated
    pub max_age: Option<Duration>,
}

impl FetchedJwks {
    /// A fetched document with no caching directive
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            max_age: None,
        }
    }

    /// Sets the issuer's caching directive
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }
}

/// Retrieves the current key set of an issuer
pub trait JwksFetcher: fmt::Debug + Send + Sync {
    /// Fetches the key set published by `issuer`
    ///
    /// # Errors
    ///
    /// Returns an error if the key set could not be retrieved.
    fn fetch(&self, issuer: &IssuerRef) -> Result<FetchedJwks, FetchError>;
}

impl<T: JwksFetcher + ?Sized> JwksFetcher for Arc<T> {
    fn fetch(&self, issuer: &IssuerRef) -> Result<FetchedJwks, FetchError> {
        (**self).fetch(issuer)
    }
}

#[cfg(feature = "reqwest")]
pub use http::HttpFetcher;

#[cfg(feature = "reqwest")]
mod http {
    use std::time::Duration;

    use aliri::jwt::IssuerRef;
    use reqwest::{
        blocking::Client,
        header::{self, HeaderMap},
    };
    use serde::Deserialize;

    use super::{FetchedJwks, JwksFetcher};
    use crate::FetchError;

    const DISCOVERY_PATHS: [&str; 2] = [
        ".well-known/openid-configuration",
        ".well-known/oauth-authorization-server",
    ];

    #[derive(Debug, Deserialize)]
    struct ServerMetadata {
        jwks_uri: String,
    }

    /// Fetches key sets over HTTPS using issuer metadata discovery
    ///
    /// The issuer's `jwks_uri` is read from its OpenID Connect discovery
    /// document, falling back to OAuth 2.0 authorization server metadata.
    /// A `max-age` directive on the key set response is honored.
    #[derive(Clone, Debug)]
    #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
    pub struct HttpFetcher {
        client: Client,
    }

    impl HttpFetcher {
        /// Constructs a fetcher with a default HTTP client
        ///
        /// # Errors
        ///
        /// Returns an error if the HTTP client could not be initialized.
        pub fn new() -> Result<Self, reqwest::Error> {
            let client = Client::builder()
                .user_agent(concat!("scitokens_keycache/", env!("CARGO_PKG_VERSION")))
                .build()?;

            Ok(Self::with_client(client))
        }

        /// Constructs a fetcher using the provided HTTP client
        pub fn with_client(client: Client) -> Self {
            Self { client }
        }

        fn discover_jwks_uri(&self, issuer: &IssuerRef) -> Result<String, FetchError> {
            let base = issuer.as_str().trim_end_matches('/');
            let mut last_error = None;

            for path in DISCOVERY_PATHS {
                let url = format!("{}/{}", base, path);
                tracing::trace!(%url, "requesting issuer metadata");

                let result = self
                    .client
                    .get(&url)
                    .send()
                    .and_then(|response| response.error_for_status())
                    .and_then(|response| response.json::<ServerMetadata>());

                match result {
                    Ok(metadata) => return Ok(metadata.jwks_uri),
                    Err(err) => {
                        let error: &dyn std::error::Error = &err;
                        tracing::debug!(error, %url, "issuer metadata not available");
                        last_error = Some(err);
                    }
                }
            }

            let err = FetchError::new(issuer, "issuer metadata could not be discovered");
            Err(match last_error {
                Some(source) => err.with_source(source),
                None => err,
            })
        }
    }

    impl JwksFetcher for HttpFetcher {
        #[tracing::instrument(skip(self), fields(jwks.url = tracing::field::Empty))]
        fn fetch(&self, issuer: &IssuerRef) -> Result<FetchedJwks, FetchError> {
            let jwks_uri = self.discover_jwks_uri(issuer)?;
            tracing::Span::current().record("jwks.url", jwks_uri.as_str());

            let response = self
                .client
                .get(&jwks_uri)
                .send()
                .map_err(|err| FetchError::new(issuer, "JWKS request failed").with_source(err))?;

            if let Err(err) = response.error_for_status_ref() {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(
                    error,
                    http.status_code = response.status().as_u16(),
                    "JWKS fetch failed; unexpected response status",
                );
                return Err(
                    FetchError::new(issuer, "JWKS endpoint returned an error status")
                        .with_source(err),
                );
            }

            let max_age = max_age(response.headers());
            let document = response
                .text()
                .map_err(|err| FetchError::new(issuer, "JWKS response unreadable").with_source(err))?;

            Ok(FetchedJwks { document, max_age })
        }
    }

    fn max_age(headers: &HeaderMap) -> Option<Duration> {
        let value = headers.get(header::CACHE_CONTROL)?.to_str().ok()?;
        value
            .split(',')
            .filter_map(|directive| directive.trim().strip_prefix("max-age="))
            .find_map(|secs| secs.trim_matches('"').parse::<u64>().ok())
            .map(Duration::from_secs)
    }

}
