//! Ready-made claim validators
//!
//! ```
//! use scitokens::validators;
//!
//! let subject = validators::string(|sub| {
//!     if sub.starts_with("user:") {
//!         Ok(())
//!     } else {
//!         Err(format!("unexpected subject `{}`", sub))
//!     }
//! });
//! let issuer = validators::one_of(["https://demo.scitokens.org"]);
//! # let _ = (subject, issuer);
//! ```

use std::{collections::BTreeSet, fmt};

use regex::Regex;
use serde_json::Value;

use crate::ClaimValidator;

/// Checks a claim with an arbitrary function of its value
#[derive(Clone)]
pub struct FromFn<F>(F);

impl<F> fmt::Debug for FromFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FromFn").finish_non_exhaustive()
    }
}

impl<F> ClaimValidator for FromFn<F>
where
    F: Fn(Option<&Value>) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, value: Option<&Value>) -> Result<(), String> {
        (self.0)(value)
    }
}

/// Checks a claim with a function of its value, which is `None` when absent
pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: Fn(Option<&Value>) -> Result<(), String> + Send + Sync,
{
    FromFn(f)
}

/// Checks every string in a claim with a function
#[derive(Clone)]
pub struct StringValidator<F>(F);

impl<F> fmt::Debug for StringValidator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringValidator").finish_non_exhaustive()
    }
}

impl<F> ClaimValidator for StringValidator<F>
where
    F: Fn(&str) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, value: Option<&Value>) -> Result<(), String> {
        for_each_string(value, |s| (self.0)(s))
    }
}

/// Checks a string claim, or each entry of a list of strings, with `f`
///
/// An absent claim or one of any other type is rejected.
pub fn string<F>(f: F) -> StringValidator<F>
where
    F: Fn(&str) -> Result<(), String> + Send + Sync,
{
    StringValidator(f)
}

/// Accepts only claims drawn from a fixed set of strings
#[derive(Clone, Debug)]
pub struct OneOf {
    allowed: BTreeSet<String>,
}

impl ClaimValidator for OneOf {
    fn validate(&self, value: Option<&Value>) -> Result<(), String> {
        for_each_string(value, |s| {
            if self.allowed.contains(s) {
                Ok(())
            } else {
                Err(format!("`{}` is not an accepted value", s))
            }
        })
    }
}

/// Accepts a string claim, or a list of strings, drawn from `values`
pub fn one_of<I, S>(values: I) -> OneOf
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    OneOf {
        allowed: values.into_iter().map(Into::into).collect(),
    }
}

/// Accepts only strings matching a regular expression
#[derive(Clone, Debug)]
pub struct Matches(Regex);

impl ClaimValidator for Matches {
    fn validate(&self, value: Option<&Value>) -> Result<(), String> {
        for_each_string(value, |s| {
            if self.0.is_match(s) {
                Ok(())
            } else {
                Err(format!("`{}` does not match `{}`", s, self.0))
            }
        })
    }
}

/// Accepts a string claim, or a list of strings, matching `regex`
pub fn matches(regex: Regex) -> Matches {
    Matches(regex)
}

fn for_each_string(
    value: Option<&Value>,
    check: impl Fn(&str) -> Result<(), String>,
) -> Result<(), String> {
    match value {
        None => Err("claim is missing".to_owned()),
        Some(Value::String(s)) => check(s),
        Some(Value::Array(values)) => values.iter().try_for_each(|v| match v {
            Value::String(s) => check(s),
            _ => Err("claim is not a list of strings".to_owned()),
        }),
        Some(_) => Err("claim is not a string".to_owned()),
    }
}
