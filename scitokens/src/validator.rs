use std::{fmt, time::Duration};

use aliri::{
    jwa,
    jws::Verifier,
    jwt::{Audience, IssuerRef},
};
use aliri_clock::{Clock, System, UnixTime};
use scitokens_keycache::KeyCache;
use serde_json::Value;

use crate::{
    error::{self, ErrorKind, Rejection},
    profile::{ANY_AUDIENCE, WLCG_ANY_AUDIENCE},
    token::{Compact, Signed},
    Error, Profile, SciToken,
};

/// A check applied to a single claim
///
/// The validator receives `None` when the claim is absent. A rejection is
/// reported as a message, which the [`Validator`] attributes to the claim.
pub trait ClaimValidator: Send + Sync {
    /// Checks the value of the claim
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the value is not acceptable.
    fn validate(&self, value: Option<&Value>) -> Result<(), String>;
}

impl<T: ClaimValidator + ?Sized> ClaimValidator for Box<T> {
    fn validate(&self, value: Option<&Value>) -> Result<(), String> {
        (**self).validate(value)
    }
}

/// Claims checked by the validator itself, so they may be marked critical
/// without registering a validator
const BUILTIN_CHECKED_CLAIMS: [&str; 6] = ["iss", "exp", "nbf", "iat", "ver", "wlcg.ver"];

/// Verifies deserialized tokens
///
/// A token is checked in stages. A profile mismatch, an untrusted issuer,
/// or a bad signature stop validation immediately. Otherwise, temporal
/// claims, audiences, registered claim validators, and critical claims are
/// all checked, and every problem found is reported together.
///
/// ```no_run
/// use scitokens::{validators, KeyCache, SciToken, Validator};
///
/// # fn main() -> Result<(), scitokens::Error> {
/// let cache = KeyCache::user_default()?;
/// let validator = Validator::new(cache)
///     .with_leeway_secs(30)
///     .add_validator("sub", validators::string(|_| Ok(())))
///     .add_critical_claims(["sub"]);
///
/// let token = SciToken::deserialize("eyJ...", Some(&["https://demo.scitokens.org"][..]))?;
/// validator.validate(&token)?;
/// # Ok(())
/// # }
/// ```
#[must_use]
pub struct Validator {
    keys: KeyCache,
    profile: Profile,
    now: Option<UnixTime>,
    leeway: Duration,
    validators: Vec<(String, Box<dyn ClaimValidator>)>,
    critical_claims: Vec<String>,
    allowed_audiences: Vec<Audience>,
    allow_refresh: bool,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("profile", &self.profile)
            .field("now", &self.now)
            .field("leeway", &self.leeway)
            .field(
                "validators",
                &self.validators.iter().map(|(claim, _)| claim).collect::<Vec<_>>(),
            )
            .field("critical_claims", &self.critical_claims)
            .field("allowed_audiences", &self.allowed_audiences)
            .field("allow_refresh", &self.allow_refresh)
            .finish_non_exhaustive()
    }
}

impl Validator {
    /// Constructs a validator that resolves signing keys through `keys`
    ///
    /// The validator accepts any profile, uses the system clock with no
    /// leeway, and may refresh keys from the issuer.
    pub fn new(keys: KeyCache) -> Self {
        Self {
            keys,
            profile: Profile::Compat,
            now: None,
            leeway: Duration::ZERO,
            validators: Vec::new(),
            critical_claims: Vec::new(),
            allowed_audiences: Vec::new(),
            allow_refresh: true,
        }
    }

    /// Requires tokens to be of `profile`
    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.set_profile(profile);
        self
    }

    /// Requires tokens to be of `profile`
    pub fn set_profile(&mut self, profile: Profile) {
        self.profile = profile;
    }

    /// Validates as though the current time were `now`
    pub fn at_time(mut self, now: UnixTime) -> Self {
        self.set_time(now);
        self
    }

    /// Validates as though the current time were `now`
    pub fn set_time(&mut self, now: UnixTime) {
        self.now = Some(now);
    }

    /// Allows a grace period on either side of the temporal claims
    pub fn with_leeway(self, leeway: Duration) -> Self {
        Self { leeway, ..self }
    }

    /// Allows a grace period, in seconds, on either side of the temporal claims
    pub fn with_leeway_secs(self, leeway: u64) -> Self {
        self.with_leeway(Duration::from_secs(leeway))
    }

    /// Registers a validator for `claim`
    ///
    /// Several validators may be registered for the same claim; all of them
    /// run.
    pub fn add_validator(
        mut self,
        claim: impl Into<String>,
        validator: impl ClaimValidator + 'static,
    ) -> Self {
        self.validators.push((claim.into(), Box::new(validator)));
        self
    }

    /// Marks claims as critical
    ///
    /// A critical claim must be present and must be checked, either by a
    /// registered validator or by the validator's own checks.
    pub fn add_critical_claims<I, S>(mut self, claims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for claim in claims {
            let claim = claim.into();
            if !self.critical_claims.contains(&claim) {
                self.critical_claims.push(claim);
            }
        }
        self
    }

    /// Accepts tokens intended for `audience`
    ///
    /// Once any audience is added, the token `aud` claim must name one of
    /// them.
    pub fn add_allowed_audience(mut self, audience: impl Into<Audience>) -> Self {
        self.allowed_audiences.push(audience.into());
        self
    }

    /// Whether keys may be fetched from the issuer during validation
    pub fn allow_key_refresh(self, allow_refresh: bool) -> Self {
        Self {
            allow_refresh,
            ..self
        }
    }

    fn now(&self) -> UnixTime {
        self.now.unwrap_or_else(|| System.now())
    }

    fn is_checked(&self, claim: &str) -> bool {
        BUILTIN_CHECKED_CLAIMS.contains(&claim)
            || (claim == "aud" && !self.allowed_audiences.is_empty())
            || self.validators.iter().any(|(name, _)| name == claim)
    }

    /// Validates a deserialized token
    ///
    /// # Errors
    ///
    /// Returns an error describing every reason the token was rejected.
    /// Tokens that were not produced by deserialization have no signature
    /// to check and are rejected as [`ErrorKind::MalformedInput`].
    pub fn validate(&self, token: &SciToken) -> Result<(), Error> {
        let now = self.now();
        let signed = token
            .signed()
            .ok_or_else(|| error::malformed("only deserialized tokens can be validated"))?;

        check_profile(self.profile, signed.profile)?;

        let issuer = token.issuer()?;
        check_allowed_issuer(signed, issuer)?;
        verify_signature(&self.keys, signed, issuer, now, self.allow_refresh)?;

        let mut rejections = check_times(token, now, self.leeway, true);

        if let Err(rejection) = check_audience(token, &self.allowed_audiences) {
            rejections.push(rejection);
        }

        for (claim, validator) in &self.validators {
            if let Err(reason) = validator.validate(token.claim(claim)) {
                rejections.push(Rejection::new(
                    ErrorKind::ClaimRejected,
                    format!("claim `{}` rejected: {}", claim, reason),
                ));
            }
        }

        for claim in &self.critical_claims {
            if token.claim(claim).is_none() {
                rejections.push(Rejection::new(
                    ErrorKind::MissingCriticalClaim,
                    format!("critical claim `{}` is not present", claim),
                ));
            } else if !self.is_checked(claim) {
                rejections.push(Rejection::new(
                    ErrorKind::MissingCriticalClaim,
                    format!("critical claim `{}` is not checked by any validator", claim),
                ));
            }
        }

        match Error::from_rejections(rejections) {
            Some(err) => {
                tracing::debug!(%issuer, error = %err, "token rejected");
                Err(err)
            }
            None => {
                tracing::debug!(%issuer, "token validated");
                Ok(())
            }
        }
    }
}

pub(crate) fn check_profile(required: Profile, actual: Profile) -> Result<(), Error> {
    if required.accepts(actual) {
        Ok(())
    } else {
        Err(Error::new(
            ErrorKind::ProfileMismatch,
            format!("token is a {} token, but {} was required", actual, required),
        ))
    }
}

fn check_allowed_issuer(signed: &Signed, issuer: &str) -> Result<(), Error> {
    match &signed.allowed_issuers {
        Some(allowed) if !allowed.iter().any(|iss| iss.as_str() == issuer) => Err(Error::new(
            ErrorKind::UntrustedIssuer,
            format!("issuer `{}` is not trusted", issuer),
        )),
        _ => Ok(()),
    }
}

/// Verifies the token signature with a key resolved from the cache
pub(crate) fn verify_signature(
    keys: &KeyCache,
    signed: &Signed,
    issuer: &str,
    now: UnixTime,
    allow_refresh: bool,
) -> Result<(), Error> {
    let alg = jwa::Algorithm::try_from(signed.header.alg.as_str()).map_err(|err| {
        Error::new(
            ErrorKind::UnsupportedAlgorithm,
            format!("token algorithm `{}` is not supported", signed.header.alg),
        )
        .with_source(err)
    })?;

    let compact = Compact::split(&signed.jwt)?;

    let key = keys.resolve_key(
        IssuerRef::from_str(issuer),
        signed.header.kid.as_deref(),
        alg,
        now,
        allow_refresh,
    )?;

    key.verify(
        alg,
        compact.message.as_bytes(),
        compact.signature.as_slice(),
    )
    .map_err(|err| {
        let kind = if err.is_incompatible_alg() {
            ErrorKind::UnsupportedAlgorithm
        } else {
            ErrorKind::SignatureInvalid
        };
        Error::new(kind, "token signature could not be verified").with_source(err)
    })
}

/// Checks `exp`, `nbf`, and optionally `iat` against `now`
///
/// Absent claims are not checked; mark `exp` critical to require it.
pub(crate) fn check_times(
    token: &SciToken,
    now: UnixTime,
    leeway: Duration,
    check_iat: bool,
) -> Vec<Rejection> {
    let mut rejections = Vec::new();
    let earliest = now.0.saturating_sub(leeway.as_secs());
    let latest = now.0.saturating_add(leeway.as_secs());

    match token.time_claim("exp") {
        Ok(Some(exp)) if exp <= earliest => rejections.push(Rejection::new(
            ErrorKind::Expired,
            format!("token expired at {}; current time is {}", exp, now.0),
        )),
        Ok(_) => {}
        Err(rejection) => rejections.push(rejection),
    }

    let mut not_before = |claim: &str| match token.time_claim(claim) {
        Ok(Some(t)) if t > latest => rejections.push(Rejection::new(
            ErrorKind::NotYetValid,
            format!("token `{}` of {} is after current time {}", claim, t, now.0),
        )),
        Ok(_) => {}
        Err(rejection) => rejections.push(rejection),
    };

    not_before("nbf");
    if check_iat {
        not_before("iat");
    }

    rejections
}

/// Checks that the token audience intersects `accepted`
///
/// An empty `accepted` list accepts any audience, and the profile
/// any-audience values match every accepted audience.
pub(crate) fn check_audience(token: &SciToken, accepted: &[Audience]) -> Result<(), Rejection> {
    if accepted.is_empty() {
        return Ok(());
    }

    let audiences = token.audiences()?;
    let matched = audiences.iter().any(|&aud| {
        aud == ANY_AUDIENCE
            || aud == WLCG_ANY_AUDIENCE
            || accepted.iter().any(|a| a.as_str() == aud)
    });

    if matched {
        Ok(())
    } else if audiences.is_empty() {
        Err(Rejection::new(
            ErrorKind::AudienceMismatch,
            "token has no audience",
        ))
    } else {
        Err(Rejection::new(
            ErrorKind::AudienceMismatch,
            format!("token audience {:?} is not accepted", audiences),
        ))
    }
}
