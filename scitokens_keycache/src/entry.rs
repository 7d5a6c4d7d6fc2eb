use aliri::{
    jwt::{Issuer, IssuerRef},
    Jwks,
};
use aliri_clock::UnixTime;
use serde::{Deserialize, Serialize};

/// The cached key set of a single issuer
///
/// The raw document is retained alongside the parsed keys so that it can be
/// returned to callers exactly as published, including any keys this crate
/// does not understand.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "KeyCacheEntryDto", into = "KeyCacheEntryDto")]
pub struct KeyCacheEntry {
    issuer: Issuer,
    document: serde_json::Value,
    keys: Jwks,
    next_update: UnixTime,
    expires: UnixTime,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct KeyCacheEntryDto {
    issuer: Issuer,
    jwks: serde_json::Value,
    next_update: UnixTime,
    expires: UnixTime,
}

impl TryFrom<KeyCacheEntryDto> for KeyCacheEntry {
    type Error = serde_json::Error;

    fn try_from(dto: KeyCacheEntryDto) -> Result<Self, Self::Error> {
        let keys = Jwks::deserialize(&dto.jwks)?;
        Ok(Self {
            issuer: dto.issuer,
            document: dto.jwks,
            keys,
            next_update: dto.next_update,
            expires: dto.expires,
        })
    }
}

impl From<KeyCacheEntry> for KeyCacheEntryDto {
    fn from(entry: KeyCacheEntry) -> Self {
        Self {
            issuer: entry.issuer,
            jwks: entry.document,
            next_update: entry.next_update,
            expires: entry.expires,
        }
    }
}

impl KeyCacheEntry {
    /// Constructs an entry from a serialized key set document
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a JSON Web Key Set.
    pub fn from_document(
        issuer: &IssuerRef,
        document: &str,
        next_update: UnixTime,
        expires: UnixTime,
    ) -> Result<Self, serde_json::Error> {
        let document: serde_json::Value = serde_json::from_str(document)?;
        Self::from_value(issuer, document, next_update, expires)
    }

    pub(crate) fn from_value(
        issuer: &IssuerRef,
        document: serde_json::Value,
        next_update: UnixTime,
        expires: UnixTime,
    ) -> Result<Self, serde_json::Error> {
        KeyCacheEntryDto {
            issuer: issuer.to_owned(),
            jwks: document,
            next_update,
            expires,
        }
        .try_into()
    }

    /// The issuer that published these keys
    pub fn issuer(&self) -> &IssuerRef {
        &self.issuer
    }

    /// The parsed key set
    pub fn keys(&self) -> &Jwks {
        &self.keys
    }

    /// The key set document as it was published
    pub fn document(&self) -> &serde_json::Value {
        &self.document
    }

    /// The time after which a refresh should be attempted
    pub fn next_update(&self) -> UnixTime {
        self.next_update
    }

    /// The time after which the keys are no longer trusted
    pub fn expires(&self) -> UnixTime {
        self.expires
    }

    /// Whether the keys may no longer be used at `now`
    pub fn is_expired(&self, now: UnixTime) -> bool {
        now >= self.expires
    }

    /// Whether a soft refresh is due at `now`
    pub fn needs_update(&self, now: UnixTime) -> bool {
        now >= self.next_update
    }
}
