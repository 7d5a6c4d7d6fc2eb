//! Create, validate, and enforce SciTokens
//!
//! [SciTokens] are JSON Web Tokens that carry capabilities: a `scope` claim
//! lists what the bearer may do and where, such as `read:/store/data`.
//! This crate covers the life cycle of such tokens:
//!
//! * a [`SciTokenKey`] signs tokens, and a [`SciToken`] is built, signed,
//!   and serialized with it, or parsed from its serialized form;
//! * a [`Validator`] checks the signature, validity period, audience, and
//!   any custom claim rules of a parsed token;
//! * an [`Enforcer`] translates the scopes of trusted tokens into access
//!   control entries and answers whether a requested access is permitted.
//!
//! Tokens come in several _profiles_: SciTokens 1.0 and 2.0, WLCG 1.0,
//! and plain `at+jwt` access tokens. The [`Profile`] of a parsed token is
//! detected from its header and claims.
//!
//! Issuer public keys are resolved through a [`KeyCache`], re-exported
//! from the [`keycache`] crate.
//!
//! [SciTokens]: https://scitokens.org
//!
//! ```no_run
//! use scitokens::{KeyCache, Profile, SciToken, SciTokenKey, Validator};
//!
//! # fn main() -> Result<(), scitokens::Error> {
//! # let (public_pem, private_pem) = ("", "");
//! let key = SciTokenKey::new("key-1", "ES256", Some(public_pem), Some(private_pem))?;
//!
//! let mut token = SciToken::new(key);
//! token.set_serialize_profile(Profile::Wlcg1);
//! token.set_claim_string("iss", "https://demo.scitokens.org");
//! token.set_claim_string("scope", "storage.read:/store");
//! let serialized = token.serialize()?;
//!
//! let parsed = SciToken::deserialize(&serialized, Some(&["https://demo.scitokens.org"][..]))?;
//! Validator::new(KeyCache::user_default()?).validate(&parsed)?;
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

mod acl;
mod enforcer;
mod error;
mod key;
mod profile;
mod token;
mod validator;
pub mod validators;


pub use acl::Acl;
pub use enforcer::{Enforcer, Grants};
pub use error::{Error, ErrorKind, Rejection};
pub use key::SciTokenKey;
pub use profile::{
    normalize_path, translate_claim_name, translate_scope_to_acl, InvalidScopeToken,
    LogicalClaim, Profile, ScopeToken, ScopeTokenRef, UnknownProfile, ANY_AUDIENCE,
    WLCG_ANY_AUDIENCE,
};
pub use token::{SciToken, DEFAULT_LIFETIME};
pub use validator::{ClaimValidator, Validator};

pub use scitokens_keycache as keycache;
pub use scitokens_keycache::KeyCache;
