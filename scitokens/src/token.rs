use aliri::{
    jwa,
    jwk::{KeyId, KeyIdRef},
    jwt::{HasAlgorithm, Issuer},
    Jwt, JwtRef,
};
use aliri_base64::Base64Url;
use aliri_clock::{Clock, System, UnixTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::{self, ErrorKind, Rejection},
    profile::{translate_claim_name, LogicalClaim, ANY_AUDIENCE, WLCG_ANY_AUDIENCE},
    Error, Profile, SciTokenKey,
};

/// Token lifetime used when none is configured, in seconds
pub const DEFAULT_LIFETIME: u64 = 600;

#[derive(Debug, Serialize)]
pub(crate) struct SigningHeader<'a> {
    pub(crate) alg: jwa::Algorithm,
    pub(crate) kid: &'a KeyIdRef,
    pub(crate) typ: &'static str,
}

impl HasAlgorithm for SigningHeader<'_> {
    fn alg(&self) -> jwa::Algorithm {
        self.alg
    }
}

/// The JOSE header of a received token
///
/// `alg` is kept as text so that unknown algorithms are reported when the
/// signature is checked rather than as a decoding failure.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct TokenHeader {
    pub(crate) alg: String,
    #[serde(default)]
    pub(crate) kid: Option<KeyId>,
    #[serde(default)]
    pub(crate) typ: Option<String>,
}

/// The parts of a token in JWS compact serialization
#[derive(Debug)]
pub(crate) struct Compact<'a> {
    pub(crate) header: TokenHeader,
    pub(crate) message: &'a str,
    pub(crate) payload: &'a str,
    pub(crate) signature: Base64Url,
}

impl<'a> Compact<'a> {
    /// Splits a token into its header, payload, and signature
    pub(crate) fn split(jwt: &'a JwtRef) -> Result<Self, Error> {
        let not_compact = || error::malformed("token is not in JWS compact form");

        let (message, signature) = jwt.as_str().rsplit_once('.').ok_or_else(not_compact)?;
        let (header, payload) = message.split_once('.').ok_or_else(not_compact)?;
        if payload.contains('.') {
            return Err(not_compact());
        }

        let header = Base64Url::from_encoded(header)
            .map_err(|err| error::malformed("token header is not base64url").with_source(err))?;
        let header = serde_json::from_slice(header.as_slice())
            .map_err(|err| error::malformed("token header is not a JOSE header").with_source(err))?;
        let signature = Base64Url::from_encoded(signature)
            .map_err(|err| error::malformed("token signature is not base64url").with_source(err))?;

        Ok(Self {
            header,
            message,
            payload,
            signature,
        })
    }
}

/// The signed form a token was deserialized from
#[derive(Clone, Debug)]
pub(crate) struct Signed {
    pub(crate) jwt: Jwt,
    pub(crate) header: TokenHeader,
    pub(crate) profile: Profile,
    pub(crate) allowed_issuers: Option<Vec<Issuer>>,
}

/// A SciToken: a set of claims that can be signed and serialized, or parsed
/// from its serialized form
///
/// Tokens built locally are signed with their [`SciTokenKey`] when
/// serialized. Tokens parsed with [`deserialize()`][SciToken::deserialize]
/// remember their signed form and detected profile so that a
/// [`Validator`][crate::Validator] or [`Enforcer`][crate::Enforcer] can
/// check them. Modifying the claims of a parsed token discards its signed
/// form.
#[derive(Clone, Debug)]
#[must_use]
pub struct SciToken {
    claims: Map<String, Value>,
    key: Option<SciTokenKey>,
    serialize_profile: Profile,
    deserialize_profile: Profile,
    lifetime: u64,
    signed: Option<Signed>,
}

impl Default for SciToken {
    fn default() -> Self {
        Self {
            claims: Map::new(),
            key: None,
            serialize_profile: Profile::Compat,
            deserialize_profile: Profile::Compat,
            lifetime: DEFAULT_LIFETIME,
            signed: None,
        }
    }
}

impl SciToken {
    /// Constructs an empty token that will be signed with `key`
    pub fn new(key: SciTokenKey) -> Self {
        Self {
            key: Some(key),
            ..Self::default()
        }
    }

    /// Parses a serialized token, detecting its profile
    ///
    /// The signature is not checked here; use a [`Validator`][crate::Validator].
    /// When `allowed_issuers` is given, validation rejects tokens from any
    /// other issuer.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be parsed.
    pub fn deserialize(text: &str, allowed_issuers: Option<&[&str]>) -> Result<Self, Error> {
        Self::deserialize_with_profile(text, allowed_issuers, Profile::Compat)
    }

    /// Parses a serialized token that must conform to `profile`
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ProfileMismatch`] if the token is of another
    /// profile, or an error if it cannot be parsed.
    pub fn deserialize_with_profile(
        text: &str,
        allowed_issuers: Option<&[&str]>,
        profile: Profile,
    ) -> Result<Self, Error> {
        let mut token = Self::default();
        token.set_deserialize_profile(profile);
        token.deserialize_into(text, allowed_issuers)?;
        Ok(token)
    }

    /// Parses a serialized token into this token, replacing its claims
    ///
    /// The token's deserialization profile applies; its key, lifetime, and
    /// serialization profile are kept. On failure the token is unchanged.
    ///
    /// # Errors
    ///
    /// See [`deserialize_with_profile()`][SciToken::deserialize_with_profile].
    pub fn deserialize_into(
        &mut self,
        text: &str,
        allowed_issuers: Option<&[&str]>,
    ) -> Result<(), Error> {
        let jwt = JwtRef::from_str(text.trim());
        let Compact {
            header, payload, ..
        } = Compact::split(jwt)?;

        let payload = Base64Url::from_encoded(payload)
            .map_err(|err| error::malformed("token payload is not base64url").with_source(err))?;
        let claims: Map<String, Value> = serde_json::from_slice(payload.as_slice())
            .map_err(|err| error::malformed("token payload is not a JSON object").with_source(err))?;

        let detected = Profile::detect(header.typ.as_deref(), &claims)?;

        if !self.deserialize_profile.accepts(detected) {
            return Err(Error::new(
                ErrorKind::ProfileMismatch,
                format!(
                    "token is a {} token, but {} was required",
                    detected, self.deserialize_profile
                ),
            ));
        }

        tracing::trace!(profile = %detected, "token deserialized");

        self.claims = claims;
        self.signed = Some(Signed {
            jwt: jwt.to_owned(),
            header,
            profile: detected,
            allowed_issuers: allowed_issuers
                .map(|issuers| issuers.iter().map(|&iss| Issuer::from(iss)).collect()),
        });

        Ok(())
    }

    /// Signs and serializes the token under its serialization profile
    ///
    /// See [`serialize_with_clock()`][SciToken::serialize_with_clock].
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::MissingSigningKey`] if the token has no private key.
    pub fn serialize(&mut self) -> Result<String, Error> {
        self.serialize_with_clock(&System)
    }

    /// Signs and serializes the token, issued at the time given by `clock`
    ///
    /// `iat` and `nbf` are set to the current time and `exp` to the current
    /// time plus the token lifetime. A random `jti` is added if absent.
    /// SciTokens 2.0 and WLCG tokens receive their version claim and, if no
    /// audience is set, the profile's any-audience value. Access tokens are
    /// marked with a `typ` of `at+jwt`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::MissingSigningKey`] if the token has no private key.
    pub fn serialize_with_clock<C: Clock>(&mut self, clock: &C) -> Result<String, Error> {
        let key = self.key.as_ref().ok_or_else(|| {
            Error::new(ErrorKind::MissingSigningKey, "token has no signing key")
        })?;
        if !key.has_private_key() {
            return Err(Error::new(
                ErrorKind::MissingSigningKey,
                format!("key `{}` has no private key material", key.key_id()),
            ));
        }

        let profile = self.serialize_profile.serialization_target();
        let now = clock.now().0;

        self.claims.insert("iat".into(), now.into());
        self.claims.insert("nbf".into(), now.into());
        self.claims
            .insert("exp".into(), now.saturating_add(self.lifetime).into());
        if !self.claims.contains_key("jti") {
            self.claims
                .insert("jti".into(), uuid::Uuid::new_v4().to_string().into());
        }

        match profile {
            Profile::SciTokens1 => {
                self.claims.insert("ver".into(), "scitoken:1.0".into());
            }
            Profile::SciTokens2 => {
                self.claims.insert("ver".into(), "scitoken:2.0".into());
                if !self.claims.contains_key("aud") {
                    self.claims.insert("aud".into(), ANY_AUDIENCE.into());
                }
            }
            Profile::Wlcg1 => {
                self.claims.insert("wlcg.ver".into(), "1.0".into());
                if !self.claims.contains_key("aud") {
                    self.claims.insert("aud".into(), WLCG_ANY_AUDIENCE.into());
                }
            }
            Profile::AtJwt | Profile::Compat => {}
        }

        let header = SigningHeader {
            alg: key.algorithm(),
            kid: key.key_id(),
            typ: if profile == Profile::AtJwt { "at+jwt" } else { "JWT" },
        };

        let jwt = Jwt::try_from_parts_with_signature(&header, &self.claims, key.jwk())
            .map_err(|err| {
                Error::new(ErrorKind::MalformedInput, "token could not be signed").with_source(err)
            })?;

        self.signed = None;
        tracing::debug!(kid = %key.key_id(), %profile, "token serialized");
        Ok(jwt.as_str().to_owned())
    }

    /// The profile the token was detected as, or will be serialized as
    pub fn profile(&self) -> Profile {
        match &self.signed {
            Some(signed) => signed.profile,
            None => self.serialize_profile.serialization_target(),
        }
    }

    /// The profile used when serializing
    pub fn serialize_profile(&self) -> Profile {
        self.serialize_profile
    }

    /// Sets the profile used when serializing
    pub fn set_serialize_profile(&mut self, profile: Profile) {
        self.serialize_profile = profile;
    }

    /// The profile required when deserializing
    pub fn deserialize_profile(&self) -> Profile {
        self.deserialize_profile
    }

    /// Sets the profile required when deserializing
    pub fn set_deserialize_profile(&mut self, profile: Profile) {
        self.deserialize_profile = profile;
    }

    /// The token lifetime, in seconds
    pub fn lifetime(&self) -> u64 {
        self.lifetime
    }

    /// Sets the token lifetime, in seconds
    pub fn set_lifetime(&mut self, seconds: u64) {
        self.lifetime = seconds;
    }

    /// The key used to sign this token
    pub fn key(&self) -> Option<&SciTokenKey> {
        self.key.as_ref()
    }

    /// All claims
    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    /// A single claim
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// Sets a claim to any JSON value
    pub fn set_claim(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.signed = None;
        self.claims.insert(name.into(), value.into());
    }

    /// Removes a claim, returning its previous value
    pub fn remove_claim(&mut self, name: &str) -> Option<Value> {
        self.signed = None;
        self.claims.remove(name)
    }

    /// Sets a claim to a string
    pub fn set_claim_string(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.set_claim(name, Value::String(value.into()));
    }

    /// Sets a claim to a list of strings
    pub fn set_claim_string_list<I, S>(&mut self, name: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = values
            .into_iter()
            .map(|v| Value::String(v.into()))
            .collect::<Vec<_>>();
        self.set_claim(name, values);
    }

    /// A string claim
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::MissingClaim`] if the claim is absent or
    /// [`ErrorKind::WrongClaimType`] if it is not a string.
    pub fn get_claim_string(&self, name: &str) -> Result<&str, Error> {
        match self.claims.get(name) {
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(error::wrong_claim_type(name, "a string").into()),
            None => Err(error::missing_claim(name)),
        }
    }

    /// A claim holding a list of strings
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::MissingClaim`] if the claim is absent or
    /// [`ErrorKind::WrongClaimType`] if it is not an array of strings.
    pub fn get_claim_string_list(&self, name: &str) -> Result<Vec<String>, Error> {
        let values = match self.claims.get(name) {
            Some(Value::Array(values)) => values,
            Some(_) => return Err(error::wrong_claim_type(name, "a list of strings").into()),
            None => return Err(error::missing_claim(name)),
        };

        values
            .iter()
            .map(|v| {
                v.as_str()
                    .map(ToOwned::to_owned)
                    .ok_or_else(|| Error::from(error::wrong_claim_type(name, "a list of strings")))
            })
            .collect()
    }

    /// The token issuer
    ///
    /// # Errors
    ///
    /// Returns an error if `iss` is absent or not a string.
    pub fn issuer(&self) -> Result<&str, Error> {
        self.get_claim_string(translate_claim_name(self.profile(), LogicalClaim::Issuer))
    }

    /// The expiration time
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::WrongClaimType`] if `exp` is not a timestamp.
    pub fn expiration(&self) -> Result<Option<UnixTime>, Error> {
        Ok(self.time_claim("exp")?.map(UnixTime))
    }

    /// The token's group memberships, under the profile-specific claim name
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::WrongClaimType`] if the claim is not a list of strings.
    pub fn groups(&self) -> Result<Vec<String>, Error> {
        let name = translate_claim_name(self.profile(), LogicalClaim::Groups);
        match self.get_claim_string_list(name) {
            Err(err) if err.kind() == ErrorKind::MissingClaim => Ok(Vec::new()),
            other => other,
        }
    }

    /// The raw `scope` claim, if present
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::WrongClaimType`] if the claim is not a string.
    pub fn scope(&self) -> Result<Option<&str>, Error> {
        let name = translate_claim_name(self.profile(), LogicalClaim::Scope);
        match self.get_claim_string(name) {
            Ok(scope) => Ok(Some(scope)),
            Err(err) if err.kind() == ErrorKind::MissingClaim => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// The intended audiences; a single string is treated as a list of one
    pub(crate) fn audiences(&self) -> Result<Vec<&str>, Rejection> {
        let name = translate_claim_name(self.profile(), LogicalClaim::Audience);
        match self.claims.get(name) {
            None => Ok(Vec::new()),
            Some(Value::String(aud)) => Ok(vec![aud.as_str()]),
            Some(Value::Array(values)) => values
                .iter()
                .map(|v| {
                    v.as_str()
                        .ok_or_else(|| error::wrong_claim_type(name, "a string or list of strings"))
                })
                .collect(),
            Some(_) => Err(error::wrong_claim_type(name, "a string or list of strings")),
        }
    }

    /// A timestamp claim, in seconds since the Unix epoch
    pub(crate) fn time_claim(&self, name: &str) -> Result<Option<u64>, Rejection> {
        match self.claims.get(name) {
            None => Ok(None),
            Some(value) => value
                .as_u64()
                .or_else(|| value.as_f64().filter(|t| *t >= 0.0).map(|t| t as u64))
                .map(Some)
                .ok_or_else(|| error::wrong_claim_type(name, "a timestamp")),
        }
    }

    pub(crate) fn signed(&self) -> Option<&Signed> {
        self.signed.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use aliri_clock::TestClock;
    use color_eyre::Result;

    use super::*;
    use crate::test;

    #[test]
    fn serializes_and_parses_claims() -> Result<()> {
        let mut token = SciToken::new(test::rsa_key("k1")?);
        token.set_claim_string("iss", test::ISSUER);
        token.set_claim_string("scope", "read:/data");
        token.set_claim_string_list("groups", ["/cms", "/cms/production"]);

        let clock = TestClock::new(UnixTime(1_700_000_000));
        let text = token.serialize_with_clock(&clock)?;
        let parsed = SciToken::deserialize(&text, None)?;

        assert_eq!(parsed.issuer()?, test::ISSUER);
        assert_eq!(parsed.scope()?, Some("read:/data"));
        assert_eq!(parsed.groups()?, vec!["/cms", "/cms/production"]);
        assert_eq!(parsed.claim("iat"), Some(&Value::from(1_700_000_000_u64)));
        assert_eq!(parsed.expiration()?, Some(UnixTime(1_700_000_600)));
        assert_eq!(parsed.profile(), Profile::SciTokens1);
        assert!(parsed.claim("jti").and_then(Value::as_str).is_some());
        Ok(())
    }

    #[test]
    fn lifetime_sets_expiration() -> Result<()> {
        let mut token = SciToken::new(test::rsa_key("k1")?);
        token.set_lifetime(3600);

        token.serialize_with_clock(&TestClock::new(UnixTime(100)))?;
        assert_eq!(token.expiration()?, Some(UnixTime(3700)));
        Ok(())
    }

    #[test]
    fn existing_jti_is_kept() -> Result<()> {
        let mut token = SciToken::new(test::rsa_key("k1")?);
        token.set_claim_string("jti", "fixed");

        token.serialize()?;
        assert_eq!(token.get_claim_string("jti")?, "fixed");
        Ok(())
    }

    #[test]
    fn scitokens2_adds_version_and_audience() -> Result<()> {
        let mut token = SciToken::new(test::rsa_key("k1")?);
        token.set_serialize_profile(Profile::SciTokens2);

        let parsed = SciToken::deserialize(&token.serialize()?, None)?;
        assert_eq!(parsed.profile(), Profile::SciTokens2);
        assert_eq!(parsed.get_claim_string("ver")?, "scitoken:2.0");
        assert_eq!(parsed.get_claim_string("aud")?, ANY_AUDIENCE);
        Ok(())
    }

    #[test]
    fn wlcg_keeps_explicit_audience() -> Result<()> {
        let mut token = SciToken::new(test::rsa_key("k1")?);
        token.set_serialize_profile(Profile::Wlcg1);
        token.set_claim_string("aud", "https://storage.example.org");
        token.set_claim_string_list("wlcg.groups", ["/atlas"]);

        let parsed = SciToken::deserialize(&token.serialize()?, None)?;
        assert_eq!(parsed.profile(), Profile::Wlcg1);
        assert_eq!(parsed.get_claim_string("wlcg.ver")?, "1.0");
        assert_eq!(parsed.get_claim_string("aud")?, "https://storage.example.org");
        assert_eq!(parsed.groups()?, vec!["/atlas"]);
        Ok(())
    }

    #[test]
    fn access_tokens_are_typed() -> Result<()> {
        let mut token = SciToken::new(test::rsa_key("k1")?);
        token.set_serialize_profile(Profile::AtJwt);

        let parsed = SciToken::deserialize(&token.serialize()?, None)?;
        assert_eq!(parsed.profile(), Profile::AtJwt);
        Ok(())
    }

    #[test]
    fn profile_isolation() -> Result<()> {
        let mut token = SciToken::new(test::rsa_key("k1")?);
        token.set_serialize_profile(Profile::Wlcg1);
        let text = token.serialize()?;

        let err = SciToken::deserialize_with_profile(&text, None, Profile::SciTokens1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProfileMismatch);

        let parsed = SciToken::deserialize_with_profile(&text, None, Profile::Wlcg1)?;
        assert_eq!(parsed.profile(), Profile::Wlcg1);
        Ok(())
    }

    #[test]
    fn deserialize_into_keeps_configuration() -> Result<()> {
        let mut source = SciToken::new(test::rsa_key("k1")?);
        source.set_claim_string("sub", "alice");
        let text = source.serialize()?;

        let mut target = SciToken::default();
        target.set_lifetime(42);
        target.set_deserialize_profile(Profile::Wlcg1);
        let err = target.deserialize_into(&text, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProfileMismatch);
        assert!(target.claims().is_empty());

        target.set_deserialize_profile(Profile::SciTokens1);
        target.deserialize_into(&text, None)?;
        assert_eq!(target.get_claim_string("sub")?, "alice");
        assert_eq!(target.lifetime(), 42);
        Ok(())
    }

    #[test]
    fn serialization_requires_private_key() -> Result<()> {
        let mut unsigned = SciToken::default();
        assert_eq!(unsigned.serialize().unwrap_err().kind(), ErrorKind::MissingSigningKey);

        let pems = test::rsa_pems();
        let public = SciTokenKey::new("k1", "RS256", Some(&pems.public), None)?;
        let mut token = SciToken::new(public);
        assert_eq!(token.serialize().unwrap_err().kind(), ErrorKind::MissingSigningKey);
        Ok(())
    }

    #[test]
    fn claim_accessors_check_shape() {
        let mut token = SciToken::default();
        token.set_claim("count", 3);
        token.set_claim_string_list("list", ["a", "b"]);
        token.set_claim("mixed", serde_json::json!(["a", 1]));

        assert_eq!(token.get_claim_string("count").unwrap_err().kind(), ErrorKind::WrongClaimType);
        assert_eq!(token.get_claim_string("absent").unwrap_err().kind(), ErrorKind::MissingClaim);
        assert_eq!(token.get_claim_string_list("list").ok(), Some(vec!["a".into(), "b".into()]));
        assert_eq!(
            token.get_claim_string_list("mixed").unwrap_err().kind(),
            ErrorKind::WrongClaimType
        );
        assert_eq!(token.expiration().ok(), Some(None));
    }

    #[test]
    fn garbage_is_malformed() {
        for text in ["", "abc", "a.b.c", "a.b.c.d", "e30.bm90IGpzb24.c2ln"] {
            let err = SciToken::deserialize(text, None).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedInput, "input {:?}", text);
        }
    }

    #[test]
    fn modifying_claims_discards_signed_form() -> Result<()> {
        let mut token = SciToken::new(test::rsa_key("k1")?);
        let mut parsed = SciToken::deserialize(&token.serialize()?, None)?;
        assert!(parsed.signed().is_some());

        parsed.set_claim_string("scope", "write:/");
        assert!(parsed.signed().is_none());
        Ok(())
    }
}
