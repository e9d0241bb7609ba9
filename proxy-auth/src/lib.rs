//! Authentication of metric submissions with JSON web tokens.
//!
//! Clients sign a token with a secret shared with the proxy and pass it along with every request.
//! The proxy accepts compact JWS tokens signed with `HS256`, `HS384` or `HS512`. Registered time
//! claims are checked when present:
//!
//!  - `exp`: the token is rejected after this time.
//!  - `nbf`: the token is rejected before this time.
//!  - `iat`: the token is rejected if it was issued in the future.
//!
//! ```
//! use proxy_auth::{Algorithm, JwtVerifier};
//!
//! let secret = b"shared secret";
//! let token = proxy_auth::sign(&serde_json::json!({"sub": "web1"}), secret, Algorithm::HS256);
//!
//! let claims = JwtVerifier::new(secret).verify(&token).unwrap();
//! assert_eq!(claims["sub"], "web1");
//! ```

#![warn(missing_docs)]

use std::fmt;

use chrono::{DateTime, Utc};
use data_encoding::BASE64URL_NOPAD;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};

/// The claims of a verified token.
pub type Claims = serde_json::Map<String, serde_json::Value>;

/// An error raised when verifying a token.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The token is not made of three base64url segments.
    #[error("bad token encoding")]
    BadEncoding,
    /// The header segment is not a valid JOSE header.
    #[error("bad token header")]
    BadHeader(#[source] serde_json::Error),
    /// The token is signed with an algorithm other than HMAC-SHA2.
    #[error("unsupported signing algorithm {0:?}")]
    UnsupportedAlgorithm(String),
    /// The signature does not match the secret.
    #[error("invalid signature on token")]
    BadSignature,
    /// The payload is not a JSON object or has malformed time claims.
    #[error("bad token claims")]
    BadClaims,
    /// The `exp` claim lies in the past.
    #[error("token has expired")]
    Expired,
    /// The `nbf` claim lies in the future.
    #[error("token is not valid yet")]
    NotYetValid,
    /// The `iat` claim lies in the future.
    #[error("token was issued in the future")]
    IssuedInFuture,
}

/// The HMAC algorithms accepted for signing tokens.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum Algorithm {
    /// HMAC with SHA-256.
    HS256,
    /// HMAC with SHA-384.
    HS384,
    /// HMAC with SHA-512.
    HS512,
}

impl Algorithm {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "HS256" => Some(Self::HS256),
            "HS384" => Some(Self::HS384),
            "HS512" => Some(Self::HS512),
            _ => None,
        }
    }

    /// Returns the `alg` header value of the algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::HS384 => "HS384",
            Self::HS512 => "HS512",
        }
    }

    fn sign(&self, secret: &[u8], message: &[u8]) -> Vec<u8> {
        match self {
            Self::HS256 => hmac_sign::<Hmac<Sha256>>(secret, message),
            Self::HS384 => hmac_sign::<Hmac<Sha384>>(secret, message),
            Self::HS512 => hmac_sign::<Hmac<Sha512>>(secret, message),
        }
    }

    fn verify(&self, secret: &[u8], message: &[u8], signature: &[u8]) -> bool {
        match self {
            Self::HS256 => hmac_verify::<Hmac<Sha256>>(secret, message, signature),
            Self::HS384 => hmac_verify::<Hmac<Sha384>>(secret, message, signature),
            Self::HS512 => hmac_verify::<Hmac<Sha512>>(secret, message, signature),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn hmac_sign<M: Mac + KeyInit>(secret: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = <M as KeyInit>::new_from_slice(secret).expect("HMAC takes variable keys");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

fn hmac_verify<M: Mac + KeyInit>(secret: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(mut mac) = <M as KeyInit>::new_from_slice(secret) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(signature).is_ok()
}

#[derive(Debug, Deserialize, Serialize)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

/// Creates a compact token carrying `claims`, signed with `secret`.
pub fn sign(claims: &serde_json::Value, secret: &[u8], algorithm: Algorithm) -> String {
    let header = Header {
        alg: algorithm.name().to_owned(),
        typ: Some("JWT".to_owned()),
    };

    // Both values consist of JSON values, serialization cannot fail.
    let header = serde_json::to_vec(&header).unwrap_or_default();
    let claims = serde_json::to_vec(claims).unwrap_or_default();

    let message = format!(
        "{}.{}",
        BASE64URL_NOPAD.encode(&header),
        BASE64URL_NOPAD.encode(&claims)
    );
    let signature = algorithm.sign(secret, message.as_bytes());

    format!("{message}.{}", BASE64URL_NOPAD.encode(&signature))
}

/// Verifies tokens signed with a shared secret.
#[derive(Clone)]
pub struct JwtVerifier {
    secret: Vec<u8>,
}

impl JwtVerifier {
    /// Creates a verifier for the given secret.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Verifies a token against the current time and returns its claims.
    pub fn verify(&self, token: &str) -> Result<Claims, VerifyError> {
        self.verify_at(token, Utc::now())
    }

    /// Verifies a token against the given time and returns its claims.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, VerifyError> {
        let mut segments = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(VerifyError::BadEncoding);
        };

        let header_json = decode(header)?;
        let header: Header = serde_json::from_slice(&header_json).map_err(VerifyError::BadHeader)?;
        let algorithm = Algorithm::from_name(&header.alg)
            .ok_or(VerifyError::UnsupportedAlgorithm(header.alg))?;

        let signature = decode(signature)?;
        let message_len = token.len() - signature_len(token);
        if !algorithm.verify(&self.secret, &token.as_bytes()[..message_len], &signature) {
            return Err(VerifyError::BadSignature);
        }

        let claims: Claims =
            serde_json::from_slice(&decode(payload)?).map_err(|_| VerifyError::BadClaims)?;
        validate_times(&claims, now.timestamp() as f64)?;

        Ok(claims)
    }
}

impl fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("secret", &"[redacted]")
            .finish()
    }
}

fn decode(segment: &str) -> Result<Vec<u8>, VerifyError> {
    BASE64URL_NOPAD
        .decode(segment.as_bytes())
        .map_err(|_| VerifyError::BadEncoding)
}

/// Returns the length of the signature segment including its leading dot.
fn signature_len(token: &str) -> usize {
    token.rfind('.').map_or(0, |index| token.len() - index)
}

fn time_claim(claims: &Claims, name: &str) -> Result<Option<f64>, VerifyError> {
    match claims.get(name) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => value.as_f64().map(Some).ok_or(VerifyError::BadClaims),
    }
}

fn validate_times(claims: &Claims, now: f64) -> Result<(), VerifyError> {
    if let Some(exp) = time_claim(claims, "exp")? {
        if now > exp {
            return Err(VerifyError::Expired);
        }
    }

    if let Some(nbf) = time_claim(claims, "nbf")? {
        if now < nbf {
            return Err(VerifyError::NotYetValid);
        }
    }

    if let Some(iat) = time_claim(claims, "iat")? {
        if now < iat {
            return Err(VerifyError::IssuedInFuture);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;

    const SECRET: &[u8] = b"test secret";

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_roundtrip_all_algorithms() {
        let verifier = JwtVerifier::new(SECRET);
        for algorithm in [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512] {
            let token = sign(&json!({"sub": "client", "iat": 100}), SECRET, algorithm);
            let claims = verifier.verify_at(&token, at(200)).unwrap();
            assert_eq!(claims["sub"], "client", "{algorithm}");
        }
    }

    #[test]
    fn test_known_token() {
        // HS256 token for {"sub":"1234567890","name":"John Doe","iat":1516239022} signed with
        // "your-256-bit-secret".
        let token = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.\
                     eyJzdWIiOiIxMjM0NTY3ODkwIiwibmFtZSI6IkpvaG4gRG9lIiwiaWF0IjoxNTE2MjM5MDIyfQ.\
                     SflKxwRJSMeKKF2QT4fwpMeJf36POk6yJV_adQssw5c";

        let claims = JwtVerifier::new("your-256-bit-secret")
            .verify_at(token, at(1_700_000_000))
            .unwrap();
        let claims: BTreeMap<_, _> = claims.into_iter().collect();

        insta::assert_json_snapshot!(claims, @r#"
        {
          "iat": 1516239022,
          "name": "John Doe",
          "sub": "1234567890"
        }
        "#);
    }

    #[test]
    fn test_wrong_secret() {
        let token = sign(&json!({}), b"other secret", Algorithm::HS256);
        assert!(matches!(
            JwtVerifier::new(SECRET).verify(&token),
            Err(VerifyError::BadSignature)
        ));
    }

    #[test]
    fn test_tampered_payload() {
        let token = sign(&json!({"sub": "a"}), SECRET, Algorithm::HS256);
        let mut parts: Vec<_> = token.split('.').map(str::to_owned).collect();
        parts[1] = BASE64URL_NOPAD.encode(br#"{"sub":"b"}"#);

        assert!(matches!(
            JwtVerifier::new(SECRET).verify(&parts.join(".")),
            Err(VerifyError::BadSignature)
        ));
    }

    #[test]
    fn test_unsupported_algorithm() {
        let header = BASE64URL_NOPAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = BASE64URL_NOPAD.encode(b"{}");
        let token = format!("{header}.{payload}.");

        let error = JwtVerifier::new(SECRET).verify(&token).unwrap_err();
        insta::assert_snapshot!(error.to_string(), @r#"unsupported signing algorithm "none""#);
    }

    #[test]
    fn test_bad_encoding() {
        let verifier = JwtVerifier::new(SECRET);
        for token in ["", "abc", "a.b", "a.b.c.d", "!!!.e30.e30"] {
            assert!(
                matches!(verifier.verify(token), Err(VerifyError::BadEncoding)),
                "{token}"
            );
        }
    }

    #[test]
    fn test_bad_header() {
        let header = BASE64URL_NOPAD.encode(b"not json");
        let token = format!("{header}.e30.e30");
        assert!(matches!(
            JwtVerifier::new(SECRET).verify(&token),
            Err(VerifyError::BadHeader(_))
        ));
    }

    #[test]
    fn test_bad_claims() {
        let verifier = JwtVerifier::new(SECRET);

        let token = sign(&json!(["not", "an", "object"]), SECRET, Algorithm::HS256);
        assert!(matches!(verifier.verify(&token), Err(VerifyError::BadClaims)));

        let token = sign(&json!({"exp": "tomorrow"}), SECRET, Algorithm::HS256);
        assert!(matches!(verifier.verify(&token), Err(VerifyError::BadClaims)));
    }

    #[test]
    fn test_time_claims() {
        let verifier = JwtVerifier::new(SECRET);
        let token = sign(
            &json!({"iat": 1000, "nbf": 1500, "exp": 2000}),
            SECRET,
            Algorithm::HS512,
        );

        assert!(matches!(
            verifier.verify_at(&token, at(900)),
            Err(VerifyError::NotYetValid)
        ));
        assert!(matches!(
            verifier.verify_at(&token, at(1200)),
            Err(VerifyError::NotYetValid)
        ));
        assert!(verifier.verify_at(&token, at(1500)).is_ok());
        assert!(verifier.verify_at(&token, at(2000)).is_ok());
        assert!(matches!(
            verifier.verify_at(&token, at(2001)),
            Err(VerifyError::Expired)
        ));

        let token = sign(&json!({"iat": 5000}), SECRET, Algorithm::HS384);
        assert!(matches!(
            verifier.verify_at(&token, at(4000)),
            Err(VerifyError::IssuedInFuture)
        ));
    }
}
