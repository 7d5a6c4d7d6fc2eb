//! Token profiles and the translation of profile-specific claims
//!
//! SciTokens 1.0, SciTokens 2.0, WLCG 1.0, and RFC 9068 access tokens all
//! carry authorizations in a `scope` claim, but they differ in how the
//! profile is declared, which claim names hold groups and versions, and
//! which verbs appear in scopes. A [`Profile`] names one of these formats;
//! [`Profile::Compat`] detects the format of each token and maps WLCG
//! storage verbs onto their SciTokens 1.0 equivalents.

use std::{fmt, str::FromStr};

use aliri_braid::braid;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    error::{self, ErrorKind},
    Acl, Error,
};

/// The token format under which claims are interpreted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Profile {
    /// Detect the profile of each token and accept any
    #[default]
    Compat,
    /// SciTokens 1.0
    SciTokens1,
    /// SciTokens 2.0
    SciTokens2,
    /// WLCG common JWT profile 1.0
    Wlcg1,
    /// JWT profile for OAuth 2.0 access tokens (RFC 9068)
    AtJwt,
}

/// The audience value that SciTokens 2.0 uses to accept any relying party
pub const ANY_AUDIENCE: &str = "ANY";

/// The audience value that WLCG tokens use to accept any relying party
pub const WLCG_ANY_AUDIENCE: &str = "https://wlcg.cern.ch/jwt/v1/any";

const AT_JWT_TYPES: [&str; 2] = ["at+jwt", "application/at+jwt"];

impl Profile {
    /// Every profile, in declaration order
    pub const ALL: [Profile; 5] = [
        Profile::Compat,
        Profile::SciTokens1,
        Profile::SciTokens2,
        Profile::Wlcg1,
        Profile::AtJwt,
    ];

    /// The stable name of this profile
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compat => "compat",
            Self::SciTokens1 => "scitokens:1.0",
            Self::SciTokens2 => "scitokens:2.0",
            Self::Wlcg1 => "wlcg:1.0",
            Self::AtJwt => "at+jwt",
        }
    }

    /// The profile a token is written in when serialized under this profile
    ///
    /// Compat tokens are written as SciTokens 1.0.
    pub fn serialization_target(self) -> Self {
        match self {
            Self::Compat => Self::SciTokens1,
            other => other,
        }
    }

    /// Whether a token of profile `token` is acceptable under this profile
    pub fn accepts(self, token: Profile) -> bool {
        self == Self::Compat || self == token
    }

    /// Determines the profile of a token from its `typ` header and claims
    ///
    /// An explicit `typ` of `at+jwt` takes precedence. Otherwise the
    /// version claims decide, and failing those the shape of the scopes.
    ///
    /// # Errors
    ///
    /// Returns an error if the token declares a version this crate does not
    /// know.
    pub fn detect(typ: Option<&str>, claims: &Map<String, Value>) -> Result<Self, Error> {
        if let Some(typ) = typ {
            if AT_JWT_TYPES.iter().any(|t| t.eq_ignore_ascii_case(typ)) {
                return Ok(Self::AtJwt);
            }
        }

        if let Some(ver) = claims.get("ver") {
            return match ver.as_str() {
                Some("scitoken:2.0" | "scitokens:2.0") => Ok(Self::SciTokens2),
                Some("scitoken:1.0" | "scitokens:1.0") => Ok(Self::SciTokens1),
                Some(other) => Err(error::malformed(format!(
                    "unsupported token version `{}`",
                    other
                ))),
                None => Err(error::wrong_claim_type("ver", "a string").into()),
            };
        }

        if claims.contains_key("wlcg.ver") {
            return Ok(Self::Wlcg1);
        }

        let wlcg_scopes = claims
            .get("scope")
            .and_then(Value::as_str)
            .map_or(false, |scope| {
                scope
                    .split_whitespace()
                    .any(|s| s.starts_with("storage.") || s.starts_with("compute."))
            });

        if wlcg_scopes {
            Ok(Self::Wlcg1)
        } else {
            Ok(Self::SciTokens1)
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unrecognized profile name
#[derive(Debug, Error)]
#[error("unknown token profile `{0}`")]
pub struct UnknownProfile(String);

impl FromStr for Profile {
    type Err = UnknownProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownProfile(s.to_owned()))
    }
}

/// A claim whose name depends on the profile
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogicalClaim {
    /// The token issuer
    Issuer,
    /// The token subject
    Subject,
    /// The intended audience
    Audience,
    /// The granted authorizations
    Scope,
    /// Group memberships
    Groups,
    /// The profile version marker
    Version,
}

/// The claim name that holds `claim` under `profile`
///
/// Compat resolves to the SciTokens names; callers interpreting a
/// deserialized token should pass the token's detected profile.
pub fn translate_claim_name(profile: Profile, claim: LogicalClaim) -> &'static str {
    match (claim, profile) {
        (LogicalClaim::Issuer, _) => "iss",
        (LogicalClaim::Subject, _) => "sub",
        (LogicalClaim::Audience, _) => "aud",
        (LogicalClaim::Scope, _) => "scope",
        (LogicalClaim::Groups, Profile::Wlcg1) => "wlcg.groups",
        (LogicalClaim::Groups, _) => "groups",
        (LogicalClaim::Version, Profile::Wlcg1) => "wlcg.ver",
        (LogicalClaim::Version, _) => "ver",
    }
}

/// An invalid scope token
#[derive(Debug, Error)]
pub enum InvalidScopeToken {
    /// The scope token was the empty string
    #[error("scope token cannot be empty")]
    EmptyString,
    /// The scope token contained an invalid byte
    #[error("invalid scope token byte at position {position}: 0x{value:02x}")]
    InvalidByte {
        /// The index in the scope token where the invalid byte was found
        position: usize,
        /// The invalid byte value
        value: u8,
    },
}

impl From<std::convert::Infallible> for InvalidScopeToken {
    fn from(x: std::convert::Infallible) -> Self {
        match x {}
    }
}

/// A single entry of a space-delimited `scope` claim
///
/// A scope token is non-empty and composed of printable ASCII characters
/// other than ` `, `"`, and `\`.
#[braid(validator, ref_doc = "A borrowed reference to a [`ScopeToken`]")]
pub struct ScopeToken;

impl aliri_braid::Validator for ScopeToken {
    type Error = InvalidScopeToken;

    fn validate(s: &str) -> Result<(), Self::Error> {
        if s.is_empty() {
            Err(InvalidScopeToken::EmptyString)
        } else if let Some((position, &value)) = s
            .as_bytes()
            .iter()
            .enumerate()
            .find(|(_, &b)| b <= 0x20 || b == 0x22 || b == 0x5C || 0x7F <= b)
        {
            Err(InvalidScopeToken::InvalidByte { position, value })
        } else {
            Ok(())
        }
    }
}

impl ScopeTokenRef {
    /// The authorization verb, before any `:`
    pub fn authz(&self) -> &str {
        self.split().0
    }

    /// The resource path, after the first `:`, if any
    pub fn path(&self) -> Option<&str> {
        self.split().1
    }

    fn split(&self) -> (&str, Option<&str>) {
        match self.as_str().split_once(':') {
            Some((authz, path)) => (authz, Some(path)),
            None => (self.as_str(), None),
        }
    }
}

fn compat_authz(authz: &str) -> &str {
    match authz {
        "storage.read" => "read",
        "storage.create" | "storage.modify" => "write",
        other => other,
    }
}

/// Translates a `scope` claim into access control entries
///
/// Each whitespace-delimited scope of the form `authz[:path]` yields one
/// entry. A scope without a path grants the whole namespace, `/`. Under
/// [`Profile::Compat`], WLCG storage verbs become `read` and `write`.
///
/// # Errors
///
/// Returns an error if a scope token contains invalid characters or its
/// path is not absolute.
pub fn translate_scope_to_acl(profile: Profile, scope: &str) -> Result<Vec<Acl>, Error> {
    scope
        .split_whitespace()
        .map(|raw| {
            let token = ScopeTokenRef::from_str(raw).map_err(|err| {
                error::malformed(format!("invalid scope `{}`", raw)).with_source(err)
            })?;

            let authz = match profile {
                Profile::Compat => compat_authz(token.authz()),
                _ => token.authz(),
            };

            let resource = match token.path() {
                None | Some("") => "/".to_owned(),
                Some(path) => normalize_path(path)?,
            };

            Ok(Acl::new(authz, resource))
        })
        .collect()
}

/// Normalizes an absolute resource path
///
/// Repeated separators and `.` segments are removed, `..` segments are
/// resolved without climbing above the root, and any trailing separator is
/// dropped.
///
/// # Errors
///
/// Returns [`ErrorKind::MalformedInput`] if the path is not absolute.
pub fn normalize_path(path: &str) -> Result<String, Error> {
    if !path.starts_with('/') {
        return Err(Error::new(
            ErrorKind::MalformedInput,
            format!("resource path `{}` is not absolute", path),
        ));
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    Ok(format!("/{}", segments.join("/")))
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use serde_json::json;

    use super::*;

    fn claims(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn explicit_type_wins() -> Result<()> {
        let claims = claims(json!({ "ver": "scitoken:2.0" }));
        assert_eq!(Profile::detect(Some("AT+JWT"), &claims)?, Profile::AtJwt);
        assert_eq!(
            Profile::detect(Some("application/at+jwt"), &claims)?,
            Profile::AtJwt
        );
        assert_eq!(Profile::detect(Some("JWT"), &claims)?, Profile::SciTokens2);
        Ok(())
    }

    #[test]
    fn version_claims_decide() -> Result<()> {
        let v1 = claims(json!({ "ver": "scitokens:1.0", "scope": "storage.read:/" }));
        assert_eq!(Profile::detect(None, &v1)?, Profile::SciTokens1);

        let wlcg = claims(json!({ "wlcg.ver": "1.0", "scope": "read:/" }));
        assert_eq!(Profile::detect(None, &wlcg)?, Profile::Wlcg1);
        Ok(())
    }

    #[test]
    fn unknown_version_is_rejected() {
        let err = Profile::detect(None, &claims(json!({ "ver": "scitoken:9.0" }))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);

        let err = Profile::detect(None, &claims(json!({ "ver": 2 }))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WrongClaimType);
    }

    #[test]
    fn scope_shape_heuristic() -> Result<()> {
        let wlcg = claims(json!({ "scope": "openid compute.read" }));
        assert_eq!(Profile::detect(None, &wlcg)?, Profile::Wlcg1);

        let sci = claims(json!({ "scope": "read:/data write:/data/out" }));
        assert_eq!(Profile::detect(None, &sci)?, Profile::SciTokens1);

        assert_eq!(Profile::detect(None, &Map::new())?, Profile::SciTokens1);
        Ok(())
    }

    #[test]
    fn profile_names_round_trip() -> Result<()> {
        for profile in Profile::ALL {
            assert_eq!(profile.as_str().parse::<Profile>()?, profile);
        }
        assert!("scitokens:3.0".parse::<Profile>().is_err());
        Ok(())
    }

    #[test]
    fn claim_names_follow_profile() {
        assert_eq!(translate_claim_name(Profile::Wlcg1, LogicalClaim::Groups), "wlcg.groups");
        assert_eq!(translate_claim_name(Profile::SciTokens2, LogicalClaim::Groups), "groups");
        assert_eq!(translate_claim_name(Profile::Wlcg1, LogicalClaim::Version), "wlcg.ver");
        assert_eq!(translate_claim_name(Profile::Compat, LogicalClaim::Version), "ver");
        assert_eq!(translate_claim_name(Profile::AtJwt, LogicalClaim::Scope), "scope");
    }

    #[test]
    fn compat_translates_wlcg_storage_scopes() -> Result<()> {
        let acls = translate_scope_to_acl(
            Profile::Compat,
            "storage.read:/project/data storage.create:/out storage.modify:/tmp",
        )?;

        assert_eq!(
            acls,
            vec![
                Acl::new("read", "/project/data"),
                Acl::new("write", "/out"),
                Acl::new("write", "/tmp"),
            ]
        );
        Ok(())
    }

    #[test]
    fn literal_profiles_keep_verbs() -> Result<()> {
        let acls = translate_scope_to_acl(Profile::Wlcg1, "storage.read:/project/data")?;
        assert_eq!(acls, vec![Acl::new("storage.read", "/project/data")]);
        Ok(())
    }

    #[test]
    fn pathless_scope_grants_root() -> Result<()> {
        let acls = translate_scope_to_acl(Profile::SciTokens1, "compute.create  read:")?;
        assert_eq!(
            acls,
            vec![Acl::new("compute.create", "/"), Acl::new("read", "/")]
        );
        Ok(())
    }

    #[test]
    fn relative_scope_path_is_rejected() {
        let err = translate_scope_to_acl(Profile::SciTokens1, "read:data").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
    }

    #[test]
    fn invalid_scope_characters_are_rejected() {
        let err = translate_scope_to_acl(Profile::SciTokens1, "read:/a\"b").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
    }

    #[test]
    fn paths_are_normalized() -> Result<()> {
        assert_eq!(normalize_path("/")?, "/");
        assert_eq!(normalize_path("//a///b/")?, "/a/b");
        assert_eq!(normalize_path("/a/./b/../c")?, "/a/c");
        assert_eq!(normalize_path("/../../etc")?, "/etc");
        Ok(())
    }
}
