use aliri::{
    jwa,
    jwk::{KeyId, KeyIdRef},
    jws::{self, Signer, Verifier},
    Jwk, Jwks,
};
use aliri_base64::Base64Url;
use openssl::{
    bn::BigNumContext,
    ec::{EcGroupRef, PointConversionForm},
    nid::Nid,
    pkey::{Id, PKey},
};

use crate::{
    error::{self, ErrorKind},
    Error,
};

const PAIR_CHECK_MESSAGE: &[u8] = b"scitokens key pair check";

/// A signing or verification key identified by a key ID
///
/// A key is constructed from PEM-encoded material and is immutable
/// afterwards. Keys holding private material can sign tokens; the public
/// half can be published to a key cache.
#[derive(Clone, Debug)]
#[must_use]
pub struct SciTokenKey {
    key_id: KeyId,
    algorithm: jwa::Algorithm,
    jwk: Jwk,
    private: bool,
}

impl SciTokenKey {
    /// Constructs a key from PEM-encoded public and/or private material
    ///
    /// `algorithm` is a JWS algorithm name such as `RS256` or `ES256`. When
    /// both PEMs are supplied they must form a key pair.
    ///
    /// # Errors
    ///
    /// * [`ErrorKind::UnsupportedAlgorithm`] if the algorithm is unknown or not a
    ///   signature algorithm
    /// * [`ErrorKind::MalformedInput`] if the key ID is empty, no key material is
    ///   supplied, either PEM cannot be parsed, or the PEMs do not match
    pub fn new(
        key_id: &str,
        algorithm: &str,
        public_pem: Option<&str>,
        private_pem: Option<&str>,
    ) -> Result<Self, Error> {
        if key_id.is_empty() {
            return Err(error::malformed("key ID cannot be empty"));
        }

        let algorithm = parse_algorithm(algorithm)?;

        let private = private_pem
            .map(|pem| private_jwk_from_pem(pem, algorithm))
            .transpose()?;
        let public = public_pem
            .map(|pem| public_jwk_from_pem(pem, algorithm))
            .transpose()?;

        let (jwk, has_private) = match (private, public) {
            (Some(private), Some(public)) => {
                check_pair(&private, &public, algorithm)?;
                (private, true)
            }
            (Some(private), None) => (private, true),
            (None, Some(public)) => (public, false),
            (None, None) => return Err(error::malformed("no key material was supplied")),
        };

        let key_id = KeyId::from(key_id);
        let jwk = jwk
            .with_algorithm(algorithm)
            .with_key_id(key_id.clone());

        tracing::debug!(kid = %key_id, alg = %algorithm, private = has_private, "key constructed");

        Ok(Self {
            key_id,
            algorithm,
            jwk,
            private: has_private,
        })
    }

    /// Constructs a key from a JSON Web Key
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::MalformedInput`] if the key lacks a key ID or an
    /// algorithm.
    pub fn from_jwk(jwk: Jwk) -> Result<Self, Error> {
        let key_id = jwk
            .key_id()
            .map(ToOwned::to_owned)
            .ok_or_else(|| error::malformed("JWK has no key ID"))?;
        let algorithm = jwk
            .algorithm()
            .ok_or_else(|| error::malformed("JWK has no algorithm"))?;
        let private = jwk.can_sign(algorithm);

        Ok(Self {
            key_id,
            algorithm,
            jwk,
            private,
        })
    }

    /// The key ID
    pub fn key_id(&self) -> &KeyIdRef {
        &self.key_id
    }

    /// The signature algorithm
    pub fn algorithm(&self) -> jwa::Algorithm {
        self.algorithm
    }

    /// Whether this key can sign tokens
    pub fn has_private_key(&self) -> bool {
        self.private
    }

    pub(crate) fn jwk(&self) -> &Jwk {
        &self.jwk
    }

    /// The public half of the key
    pub fn public_jwk(&self) -> Jwk {
        self.jwk.clone().public_only()
    }

    /// A key set holding only the public half of the key
    pub fn to_jwks(&self) -> Jwks {
        let mut jwks = Jwks::default();
        jwks.add_key(self.public_jwk());
        jwks
    }

    /// The serialized key set holding only the public half of the key
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be serialized.
    pub fn to_jwks_document(&self) -> Result<String, Error> {
        serde_json::to_string(&self.to_jwks())
            .map_err(|err| error::malformed("unable to serialize key set").with_source(err))
    }
}

fn parse_algorithm(name: &str) -> Result<jwa::Algorithm, Error> {
    let algorithm = jwa::Algorithm::try_from(name).map_err(|err| {
        Error::new(
            ErrorKind::UnsupportedAlgorithm,
            format!("algorithm `{}` is not supported", name),
        )
        .with_source(err)
    })?;

    jws::Algorithm::try_from(algorithm).map_err(|err| {
        Error::new(
            ErrorKind::UnsupportedAlgorithm,
            format!("algorithm `{}` is not a signature algorithm", name),
        )
        .with_source(err)
    })?;

    Ok(algorithm)
}

fn unsupported_family(algorithm: jwa::Algorithm) -> Error {
    Error::new(
        ErrorKind::UnsupportedAlgorithm,
        format!("algorithm `{}` is not supported for SciTokens keys", algorithm),
    )
}

fn private_jwk_from_pem(pem: &str, algorithm: jwa::Algorithm) -> Result<Jwk, Error> {
    let rejected = |err| error::malformed("private key could not be parsed").with_source(err);

    match jws::Algorithm::try_from(algorithm) {
        Ok(jws::Algorithm::Rsa(_)) => Ok(Jwk::from(
            jwa::rsa::PrivateKey::from_pem(pem).map_err(rejected)?,
        )),
        Ok(jws::Algorithm::EllipticCurve(alg)) => {
            let pkey = PKey::private_key_from_pem(pem.as_bytes()).map_err(|err| {
                error::malformed("private key could not be parsed").with_source(err)
            })?;
            let key = pkey.ec_key().map_err(|err| {
                error::malformed("private key is not an elliptic curve key").with_source(err)
            })?;
            check_curve(key.group(), alg)?;

            Ok(Jwk::from(
                jwa::ec::PrivateKey::from_pem(pem).map_err(rejected)?,
            ))
        }
        _ => Err(unsupported_family(algorithm)),
    }
}

fn public_jwk_from_pem(pem: &str, algorithm: jwa::Algorithm) -> Result<Jwk, Error> {
    match jws::Algorithm::try_from(algorithm) {
        Ok(jws::Algorithm::Rsa(_)) => {
            let key = jwa::rsa::PublicKey::from_pem(pem).map_err(|err| {
                error::malformed("public key could not be parsed").with_source(err)
            })?;
            Ok(Jwk::from(key))
        }
        Ok(jws::Algorithm::EllipticCurve(alg)) => ec_public_jwk_from_pem(pem, alg),
        _ => Err(unsupported_family(algorithm)),
    }
}

fn ec_public_jwk_from_pem(pem: &str, alg: jwa::ec::SigningAlgorithm) -> Result<Jwk, Error> {
    let rejected = |err: openssl::error::ErrorStack| {
        error::malformed("public key could not be parsed").with_source(err)
    };

    let pkey = PKey::public_key_from_pem(pem.as_bytes()).map_err(rejected)?;
    if pkey.id() != Id::EC {
        return Err(error::malformed("public key is not an elliptic curve key"));
    }

    let key = pkey.ec_key().map_err(rejected)?;
    let curve = check_curve(key.group(), alg)?;

    let mut ctx = BigNumContext::new().map_err(rejected)?;
    let point = key
        .public_key()
        .to_bytes(key.group(), PointConversionForm::UNCOMPRESSED, &mut ctx)
        .map_err(rejected)?;

    Ok(Jwk::from(jwa::ec::PublicKey::from_public_point(
        curve,
        Base64Url::from_raw(point),
    )))
}

/// Ensures an EC key lies on the curve required by `alg`
fn check_curve(
    group: &EcGroupRef,
    alg: jwa::ec::SigningAlgorithm,
) -> Result<jwa::ec::Curve, Error> {
    let actual = match group.curve_name() {
        Some(Nid::X9_62_PRIME256V1) => jwa::ec::Curve::P256,
        Some(Nid::SECP384R1) => jwa::ec::Curve::P384,
        Some(Nid::SECP521R1) => jwa::ec::Curve::P521,
        _ => return Err(error::malformed("key uses an unsupported curve")),
    };

    let expected = jwa::ec::Curve::from(alg);
    if actual == expected {
        Ok(actual)
    } else {
        Err(error::malformed(format!(
            "key on curve {:?} cannot be used with {:?}, which requires {:?}",
            actual, alg, expected
        )))
    }
}

fn check_pair(private: &Jwk, public: &Jwk, algorithm: jwa::Algorithm) -> Result<(), Error> {
    let signature = private
        .sign(algorithm, PAIR_CHECK_MESSAGE)
        .map_err(|err| error::malformed("private key cannot sign").with_source(err))?;

    public
        .verify(algorithm, PAIR_CHECK_MESSAGE, &signature)
        .map_err(|err| error::malformed("public key does not match private key").with_source(err))
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;
    use crate::test;

    #[test]
    fn rsa_pair() -> Result<()> {
        let pems = test::rsa_pems();
        let key = SciTokenKey::new("k1", "RS256", Some(&pems.public), Some(&pems.private))?;

        assert_eq!(key.key_id().as_str(), "k1");
        assert_eq!(key.algorithm(), jwa::Algorithm::RS256);
        assert!(key.has_private_key());
        Ok(())
    }

    #[test]
    fn ec_pair() -> Result<()> {
        let pems = test::ec_pems();
        let key = SciTokenKey::new("ec", "ES256", Some(&pems.public), Some(&pems.private))?;
        assert!(key.has_private_key());

        let public = SciTokenKey::new("ec", "ES256", Some(&pems.public), None)?;
        assert!(!public.has_private_key());
        assert_eq!(public.public_jwk(), key.public_jwk());
        Ok(())
    }

    #[test]
    fn ec_public_key_publishes_point() -> Result<()> {
        let pems = test::ec_pems();
        let key = SciTokenKey::new("ec", "ES256", Some(&pems.public), None)?;

        let published = serde_json::to_value(key.public_jwk())?;
        assert_eq!(published["kty"], "EC");
        assert_eq!(published["crv"], "P-256");
        assert!(published["x"].as_str().is_some());
        assert!(published["y"].as_str().is_some());
        Ok(())
    }

    #[test]
    fn ec_curve_must_match_algorithm() {
        let pems = test::ec_pems();

        let err = SciTokenKey::new("ec", "ES384", Some(&pems.public), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);

        let err = SciTokenKey::new("ec", "ES512", None, Some(&pems.private)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
    }

    #[test]
    fn mismatched_pair_is_rejected() {
        let first = test::rsa_pems();
        let second = test::other_rsa_pems();

        let err =
            SciTokenKey::new("k1", "RS256", Some(&second.public), Some(&first.private)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
    }

    #[test]
    fn unknown_algorithm_is_unsupported() {
        let pems = test::rsa_pems();
        let err = SciTokenKey::new("k1", "XS256", None, Some(&pems.private)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedAlgorithm);
    }

    #[test]
    fn garbage_pem_is_malformed() {
        let err = SciTokenKey::new("k1", "RS256", Some("not a pem"), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
    }

    #[test]
    fn no_material_is_malformed() {
        let err = SciTokenKey::new("k1", "RS256", None, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
    }

    #[test]
    fn public_key_set_excludes_private_material() -> Result<()> {
        let key = test::rsa_key("k1")?;
        let document: serde_json::Value = serde_json::from_str(&key.to_jwks_document()?)?;

        let published = &document["keys"][0];
        assert_eq!(published["kid"], "k1");
        assert_eq!(published["alg"], "RS256");
        assert!(published.get("d").is_none());
        Ok(())
    }

    #[test]
    fn from_jwk_requires_key_id() -> Result<()> {
        let key = test::rsa_key("k1")?;
        let restored = SciTokenKey::from_jwk(key.public_jwk())?;
        assert!(!restored.has_private_key());

        let pems = test::rsa_pems();
        let anonymous = Jwk::from(jwa::rsa::PublicKey::from_pem(&pems.public)?)
            .with_algorithm(jwa::Algorithm::RS256);
        let err = SciTokenKey::from_jwk(anonymous).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
        Ok(())
    }
}
