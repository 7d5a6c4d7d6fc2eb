use std::time::Duration;

use aliri::jwt::{Audience, Issuer};
use aliri_clock::{Clock, System, UnixTime};
use scitokens_keycache::KeyCache;

use crate::{
    error::{self, ErrorKind},
    profile::{normalize_path, translate_scope_to_acl},
    validator::{check_audience, check_profile, check_times, verify_signature},
    Acl, Error, Profile, SciToken,
};

/// The access granted by a set of tokens
#[derive(Debug, Default)]
#[must_use]
pub struct Grants {
    acls: Vec<Acl>,
    rejected: Vec<(usize, Error)>,
}

impl Grants {
    /// The granted access control entries, in token order
    pub fn acls(&self) -> &[Acl] {
        &self.acls
    }

    /// Takes ownership of the granted entries
    pub fn into_acls(self) -> Vec<Acl> {
        self.acls
    }

    /// The tokens that were skipped, by position, with the reason
    pub fn rejected(&self) -> &[(usize, Error)] {
        &self.rejected
    }

    /// Whether any granted entry permits `authz` on `resource`
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::MalformedInput`] if `resource` is not absolute.
    pub fn permits(&self, authz: &str, resource: &str) -> Result<bool, Error> {
        let resource = normalize_path(resource)?;
        Ok(self.acls.iter().any(|acl| acl.permits(authz, &resource)))
    }
}

/// Translates tokens from a single issuer into access control entries
///
/// Each token must be signed by a key of the expected issuer, be intended
/// for one of the enforcer's audiences, and be within its validity period.
///
/// ```no_run
/// use scitokens::{Acl, Enforcer, KeyCache, SciToken};
///
/// # fn main() -> Result<(), scitokens::Error> {
/// let enforcer = Enforcer::new(
///     "https://demo.scitokens.org",
///     ["https://storage.example.org"],
///     KeyCache::user_default()?,
/// );
///
/// let token = SciToken::deserialize("eyJ...", None)?;
/// if enforcer.test(&token, &Acl::new("read", "/store/data/file.root"))? {
///     // serve the file
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
#[must_use]
pub struct Enforcer {
    issuer: Issuer,
    audiences: Vec<Audience>,
    profile: Profile,
    now: Option<UnixTime>,
    keys: KeyCache,
    allow_refresh: bool,
}

impl Enforcer {
    /// Constructs an enforcer for tokens from `issuer`
    ///
    /// Tokens must name one of `audiences`; an empty list accepts any
    /// audience.
    pub fn new<I, A>(issuer: impl Into<Issuer>, audiences: I, keys: KeyCache) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Audience>,
    {
        Self {
            issuer: issuer.into(),
            audiences: audiences.into_iter().map(Into::into).collect(),
            profile: Profile::Compat,
            now: None,
            keys,
            allow_refresh: true,
        }
    }

    /// Interprets scopes under `profile`, accepting only tokens of that profile
    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.set_profile(profile);
        self
    }

    /// Interprets scopes under `profile`, accepting only tokens of that profile
    pub fn set_profile(&mut self, profile: Profile) {
        self.profile = profile;
    }

    /// Enforces as though the current time were `now`
    pub fn at_time(mut self, now: UnixTime) -> Self {
        self.set_time(now);
        self
    }

    /// Enforces as though the current time were `now`
    pub fn set_time(&mut self, now: UnixTime) {
        self.now = Some(now);
    }

    /// Whether keys may be fetched from the issuer
    pub fn allow_key_refresh(self, allow_refresh: bool) -> Self {
        Self {
            allow_refresh,
            ..self
        }
    }

    fn now(&self) -> UnixTime {
        self.now.unwrap_or_else(|| System.now())
    }

    /// Collects the access control entries granted by `tokens`
    ///
    /// Tokens that fail verification are skipped and reported in
    /// [`Grants::rejected()`].
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::NoValidTokens`] if no token is accepted.
    pub fn generate_acls<'a, I>(&self, tokens: I) -> Result<Grants, Error>
    where
        I: IntoIterator<Item = &'a SciToken>,
    {
        let now = self.now();
        let mut grants = Grants::default();
        let mut accepted = 0;

        for (index, token) in tokens.into_iter().enumerate() {
            match self.authorize(token, now) {
                Ok(acls) => {
                    accepted += 1;
                    grants.acls.extend(acls);
                }
                Err(err) => {
                    tracing::debug!(index, error = %err, "token skipped");
                    grants.rejected.push((index, err));
                }
            }
        }

        if accepted == 0 {
            let reasons = grants
                .rejected
                .iter()
                .map(|(index, err)| format!("token {}: {}", index, err))
                .collect::<Vec<_>>();

            let message = if reasons.is_empty() {
                "no tokens were presented".to_owned()
            } else {
                format!("no tokens were accepted ({})", reasons.join("; "))
            };

            return Err(Error::new(ErrorKind::NoValidTokens, message));
        }

        tracing::debug!(
            issuer = %self.issuer,
            acls = grants.acls.len(),
            skipped = grants.rejected.len(),
            "access control entries generated"
        );
        Ok(grants)
    }

    /// The access control entries granted by a single token
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not acceptable.
    pub fn acls(&self, token: &SciToken) -> Result<Vec<Acl>, Error> {
        self.authorize(token, self.now())
    }

    /// Whether `token` grants the requested access
    ///
    /// The requested resource is granted if it equals or lies beneath a
    /// granted resource with the same authorization.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not acceptable or the requested
    /// resource is not an absolute path.
    pub fn test(&self, token: &SciToken, requested: &Acl) -> Result<bool, Error> {
        let resource = normalize_path(requested.resource())?;
        let acls = self.authorize(token, self.now())?;
        let permitted = acls
            .iter()
            .any(|acl| acl.permits(requested.authz(), &resource));

        tracing::debug!(request = %requested, permitted, "access tested");
        Ok(permitted)
    }

    fn authorize(&self, token: &SciToken, now: UnixTime) -> Result<Vec<Acl>, Error> {
        let signed = token
            .signed()
            .ok_or_else(|| error::malformed("only deserialized tokens can be enforced"))?;

        check_profile(self.profile, signed.profile)?;

        let issuer = token.issuer()?;
        if issuer != self.issuer.as_str() {
            return Err(Error::new(
                ErrorKind::UntrustedIssuer,
                format!(
                    "token issuer `{}` does not match expected issuer `{}`",
                    issuer, self.issuer
                ),
            ));
        }

        verify_signature(&self.keys, signed, issuer, now, self.allow_refresh)?;

        let mut rejections = Vec::new();
        if let Err(rejection) = check_audience(token, &self.audiences) {
            rejections.push(rejection);
        }
        rejections.extend(check_times(token, now, Duration::ZERO, false));
        if let Some(err) = Error::from_rejections(rejections) {
            return Err(err);
        }

        match token.scope()? {
            Some(scope) => translate_scope_to_acl(self.profile, scope),
            None => Ok(Vec::new()),
        }
    }
}
