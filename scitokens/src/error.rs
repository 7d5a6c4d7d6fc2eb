//! Error types produced while creating, validating, and enforcing tokens

use std::{error::Error as StdError, fmt};

use scitokens_keycache::KeyCacheError;
use thiserror::Error;

/// The category of a failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Input could not be parsed or is structurally invalid
    MalformedInput,
    /// The token was not issued under the required profile
    ProfileMismatch,
    /// The token signature does not verify
    SignatureInvalid,
    /// The signing algorithm is not supported
    UnsupportedAlgorithm,
    /// No key is available to verify the token
    KeyNotFound,
    /// The token has expired
    Expired,
    /// The token is not yet valid
    NotYetValid,
    /// The token issuer is not trusted
    UntrustedIssuer,
    /// A claim has an unexpected JSON type
    WrongClaimType,
    /// A critical claim is absent or was not checked
    MissingCriticalClaim,
    /// None of the presented tokens were acceptable
    NoValidTokens,
    /// Keys could not be fetched or cached
    FetchError,
    /// The token audience is not accepted
    AudienceMismatch,
    /// A claim validator rejected the token
    ClaimRejected,
    /// A requested claim is absent
    MissingClaim,
    /// The token has no private key to sign with
    MissingSigningKey,
}

impl ErrorKind {
    /// A short, stable name for this kind of error
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedInput => "malformed input",
            Self::ProfileMismatch => "profile mismatch",
            Self::SignatureInvalid => "invalid signature",
            Self::UnsupportedAlgorithm => "unsupported algorithm",
            Self::KeyNotFound => "key not found",
            Self::Expired => "token expired",
            Self::NotYetValid => "token not yet valid",
            Self::UntrustedIssuer => "untrusted issuer",
            Self::WrongClaimType => "wrong claim type",
            Self::MissingCriticalClaim => "missing critical claim",
            Self::NoValidTokens => "no valid tokens",
            Self::FetchError => "fetch error",
            Self::AudienceMismatch => "audience mismatch",
            Self::ClaimRejected => "claim rejected",
            Self::MissingClaim => "missing claim",
            Self::MissingSigningKey => "missing signing key",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single reason a token was rejected
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    kind: ErrorKind,
    message: String,
}

impl Rejection {
    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The category of the rejection
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// A description of the rejection
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// An error raised by this crate
///
/// Validation may reject a token for several reasons at once. All of them
/// are available through [`rejections()`][Error::rejections], in the order
/// they were found; [`kind()`][Error::kind] reports the first.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    rejections: Vec<Rejection>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind,
            rejections: vec![Rejection::new(kind, message.clone())],
            message,
            source: None,
        }
    }

    pub(crate) fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Combines several rejections into one error
    ///
    /// Returns `None` if there is nothing to report.
    pub(crate) fn from_rejections(rejections: Vec<Rejection>) -> Option<Self> {
        let kind = rejections.first()?.kind;
        let message = rejections
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");

        Some(Self {
            kind,
            message,
            rejections,
            source: None,
        })
    }

    /// The category of this error
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// A description of this error
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Every reason the operation failed, in the order they were found
    pub fn rejections(&self) -> &[Rejection] {
        &self.rejections
    }

    /// Whether any of the rejections are of the given kind
    pub fn has_rejection(&self, kind: ErrorKind) -> bool {
        self.rejections.iter().any(|r| r.kind == kind)
    }
}

impl From<Rejection> for Error {
    fn from(rejection: Rejection) -> Self {
        Self::new(rejection.kind, rejection.message)
    }
}

impl From<KeyCacheError> for Error {
    fn from(err: KeyCacheError) -> Self {
        let kind = match &err {
            KeyCacheError::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            KeyCacheError::MalformedJwks { .. } => ErrorKind::MalformedInput,
            _ => ErrorKind::FetchError,
        };

        Self::new(kind, err.to_string()).with_source(err)
    }
}

pub(crate) fn malformed(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::MalformedInput, message)
}

pub(crate) fn wrong_claim_type(claim: &str, expected: &str) -> Rejection {
    Rejection::new(
        ErrorKind::WrongClaimType,
        format!("claim `{}` is not {}", claim, expected),
    )
}

pub(crate) fn missing_claim(claim: &str) -> Error {
    Error::new(
        ErrorKind::MissingClaim,
        format!("claim `{}` is not present", claim),
    )
}
