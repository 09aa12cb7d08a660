// chimera-core/src/authority.rs
// ============================================================================
// Module: Chimera Credential Authority
// Description: Dual-keyed warrant issuance and verification.
// Purpose: Bind routing decisions to asymmetric signatures the backend checks.
// Dependencies: base64, ed25519-dalek, rand, serde, serde_json, sha2
// ============================================================================

//! ## Overview
//! The credential authority holds two independently generated Ed25519
//! keypairs. A warrant is a compact signed token whose signing key — and
//! nothing else — encodes the routing decision: the claim set is
//! schema-identical for both planes and carries no risk score. Key ids are
//! opaque slot labels. The production data plane receives only the
//! production public key and the shadow plane only the shadow public key, so
//! each plane can verify exactly the warrants meant for it.
//!
//! Expiry is half-open `[iat, exp)`: a warrant presented at `exp` exactly is
//! rejected. Every verification failure collapses into one opaque error so
//! the wire never reveals which key was tried.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::Signature;
use ed25519_dalek::Signer;
use ed25519_dalek::SigningKey;
use ed25519_dalek::VerifyingKey;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::hashing::hex_encode;
use crate::route::Route;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Reserved argument key carrying the warrant on forwarded requests.
pub const WARRANT_PARAM_KEY: &str = "__chimera_warrant__";
/// Issuer claim stamped on every warrant.
pub const WARRANT_ISSUER: &str = "chimera";
/// Audience claim stamped on every warrant.
pub const WARRANT_AUDIENCE: &str = "backend";
/// Signature algorithm label in the warrant header.
pub const WARRANT_ALG: &str = "EdDSA";
/// Default warrant lifetime in seconds.
pub const DEFAULT_WARRANT_TTL_SECS: u64 = 3_600;

// ============================================================================
// SECTION: Warrant Structure
// ============================================================================

/// Warrant token header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarrantHeader {
    /// Signature algorithm label.
    pub alg: String,
    /// Opaque keyring slot identifier.
    pub kid: String,
}

/// Warrant claim set; identical in schema for both routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarrantClaims {
    /// Issuer, always [`WARRANT_ISSUER`].
    pub iss: String,
    /// Subject: the session identifier.
    pub sub: String,
    /// Audience, always [`WARRANT_AUDIENCE`].
    pub aud: String,
    /// Tool the warrant authorizes.
    pub tool: String,
    /// Issued-at time (epoch seconds).
    pub iat: u64,
    /// Expiry time (epoch seconds, exclusive).
    pub exp: u64,
    /// Fresh random nonce.
    pub jti: String,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Credential authority errors.
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// A key file could not be read or parsed.
    #[error("key load failed for {path}: {detail}")]
    KeyLoad {
        /// Offending key path.
        path: PathBuf,
        /// Failure detail.
        detail: String,
    },
    /// Warrant serialization failed during issuance.
    #[error("warrant encoding failed")]
    Encoding,
    /// Verification failed. Deliberately opaque: parsing, signature, kid,
    /// and expiry failures are indistinguishable to the caller.
    #[error("warrant verification failed")]
    Verification,
}

// ============================================================================
// SECTION: Credential Authority
// ============================================================================

/// One signing slot bound to a route.
#[derive(Debug)]
struct SigningSlot {
    /// Opaque key identifier.
    kid: String,
    /// Private signing key. Never leaves this process.
    key: SigningKey,
}

/// Dual-keyed credential authority.
#[derive(Debug)]
pub struct CredentialAuthority {
    production: SigningSlot,
    shadow: SigningSlot,
    ttl_secs: u64,
}

impl CredentialAuthority {
    /// Builds an authority from in-memory keys.
    #[must_use]
    pub fn from_keys(
        production_kid: impl Into<String>,
        production_key: SigningKey,
        shadow_kid: impl Into<String>,
        shadow_key: SigningKey,
        ttl_secs: u64,
    ) -> Self {
        Self {
            production: SigningSlot {
                kid: production_kid.into(),
                key: production_key,
            },
            shadow: SigningSlot {
                kid: shadow_kid.into(),
                key: shadow_key,
            },
            ttl_secs,
        }
    }

    /// Loads both private keys from `<key_dir>/<kid>.key` files.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::KeyLoad`] when either file is missing or
    /// malformed.
    pub fn load(
        key_dir: &Path,
        production_kid: &str,
        shadow_kid: &str,
        ttl_secs: u64,
    ) -> Result<Self, AuthorityError> {
        let production_key = load_signing_key(&key_dir.join(format!("{production_kid}.key")))?;
        let shadow_key = load_signing_key(&key_dir.join(format!("{shadow_kid}.key")))?;
        Ok(Self::from_keys(production_kid, production_key, shadow_kid, shadow_key, ttl_secs))
    }

    /// Issues a warrant bound to the routing decision.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Encoding`] when claim serialization fails.
    pub fn issue(
        &self,
        session_id: &str,
        tool: &str,
        route: Route,
        now: u64,
    ) -> Result<String, AuthorityError> {
        let slot = match route {
            Route::Production => &self.production,
            Route::Shadow => &self.shadow,
        };
        let claims = WarrantClaims {
            iss: WARRANT_ISSUER.to_string(),
            sub: session_id.to_string(),
            aud: WARRANT_AUDIENCE.to_string(),
            tool: tool.to_string(),
            iat: now,
            exp: now.saturating_add(self.ttl_secs),
            jti: fresh_nonce(),
        };
        let header = WarrantHeader {
            alg: WARRANT_ALG.to_string(),
            kid: slot.kid.clone(),
        };
        encode_token(&header, &claims, &slot.key)
    }

    /// Verifies a warrant with the key selected by its `kid` and returns the
    /// route the signing key encodes.
    ///
    /// # Errors
    ///
    /// Returns the opaque [`AuthorityError::Verification`] on any failure.
    pub fn verify(&self, token: &str, now: u64) -> Result<Route, AuthorityError> {
        let (header, claims) = decode_unverified(token)?;
        let (route, slot) = if header.kid == self.production.kid {
            (Route::Production, &self.production)
        } else if header.kid == self.shadow.kid {
            (Route::Shadow, &self.shadow)
        } else {
            return Err(AuthorityError::Verification);
        };
        verify_token(token, &slot.key.verifying_key())?;
        check_claims(&claims, now)?;
        Ok(route)
    }

    /// Returns the public verifier for one plane. Used at deployment time to
    /// hand each data plane exactly one key.
    #[must_use]
    pub fn plane_verifier(&self, route: Route) -> PlaneVerifier {
        let slot = match route {
            Route::Production => &self.production,
            Route::Shadow => &self.shadow,
        };
        PlaneVerifier::new(slot.kid.clone(), slot.key.verifying_key())
    }
}

// ============================================================================
// SECTION: Plane Verifier
// ============================================================================

/// Single-key verifier held by one data plane.
///
/// A plane accepts exactly the warrants signed for it; a warrant signed with
/// the other plane's key fails here with the same opaque error as a forgery.
#[derive(Debug, Clone)]
pub struct PlaneVerifier {
    kid: String,
    key: VerifyingKey,
}

impl PlaneVerifier {
    /// Builds a verifier from an in-memory public key.
    #[must_use]
    pub fn new(kid: impl Into<String>, key: VerifyingKey) -> Self {
        Self {
            kid: kid.into(),
            key,
        }
    }

    /// Loads the public key from `<key_dir>/<kid>.pub`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::KeyLoad`] when the file is missing or
    /// malformed.
    pub fn load(key_dir: &Path, kid: &str) -> Result<Self, AuthorityError> {
        let path = key_dir.join(format!("{kid}.pub"));
        let key = load_verifying_key(&path)?;
        Ok(Self::new(kid, key))
    }

    /// Returns the verifier's key id.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Verifies a warrant against this plane's key and returns its claims.
    ///
    /// # Errors
    ///
    /// Returns the opaque [`AuthorityError::Verification`] on any failure,
    /// including a `kid` belonging to a different plane.
    pub fn verify(&self, token: &str, now: u64) -> Result<WarrantClaims, AuthorityError> {
        let (header, claims) = decode_unverified(token)?;
        if header.alg != WARRANT_ALG || header.kid != self.kid {
            return Err(AuthorityError::Verification);
        }
        verify_token(token, &self.key)?;
        check_claims(&claims, now)?;
        Ok(claims)
    }
}

// ============================================================================
// SECTION: Token Codec
// ============================================================================

/// Encodes and signs a compact token.
fn encode_token(
    header: &WarrantHeader,
    claims: &WarrantClaims,
    key: &SigningKey,
) -> Result<String, AuthorityError> {
    let header = serde_json::to_vec(header).map_err(|_| AuthorityError::Encoding)?;
    let claims = serde_json::to_vec(claims).map_err(|_| AuthorityError::Encoding)?;
    let mut token = String::new();
    token.push_str(&URL_SAFE_NO_PAD.encode(header));
    token.push('.');
    token.push_str(&URL_SAFE_NO_PAD.encode(claims));
    let signature = key.sign(token.as_bytes());
    token.push('.');
    token.push_str(&URL_SAFE_NO_PAD.encode(signature.to_bytes()));
    Ok(token)
}

/// Splits and decodes a token without checking the signature.
fn decode_unverified(token: &str) -> Result<(WarrantHeader, WarrantClaims), AuthorityError> {
    let mut parts = token.split('.');
    let header = parts.next().ok_or(AuthorityError::Verification)?;
    let claims = parts.next().ok_or(AuthorityError::Verification)?;
    let signature = parts.next().ok_or(AuthorityError::Verification)?;
    if parts.next().is_some() || signature.is_empty() {
        return Err(AuthorityError::Verification);
    }
    let header = URL_SAFE_NO_PAD.decode(header).map_err(|_| AuthorityError::Verification)?;
    let claims = URL_SAFE_NO_PAD.decode(claims).map_err(|_| AuthorityError::Verification)?;
    let header: WarrantHeader =
        serde_json::from_slice(&header).map_err(|_| AuthorityError::Verification)?;
    let claims: WarrantClaims =
        serde_json::from_slice(&claims).map_err(|_| AuthorityError::Verification)?;
    Ok((header, claims))
}

/// Verifies the signature over the `header.claims` signing input.
fn verify_token(token: &str, key: &VerifyingKey) -> Result<(), AuthorityError> {
    let (signing_input, signature) =
        token.rsplit_once('.').ok_or(AuthorityError::Verification)?;
    let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| AuthorityError::Verification)?;
    let signature =
        Signature::try_from(signature.as_slice()).map_err(|_| AuthorityError::Verification)?;
    key.verify_strict(signing_input.as_bytes(), &signature)
        .map_err(|_| AuthorityError::Verification)
}

/// Validates the claim set: issuer, audience, and half-open expiry.
fn check_claims(claims: &WarrantClaims, now: u64) -> Result<(), AuthorityError> {
    if claims.iss != WARRANT_ISSUER || claims.aud != WARRANT_AUDIENCE {
        return Err(AuthorityError::Verification);
    }
    if now >= claims.exp {
        return Err(AuthorityError::Verification);
    }
    Ok(())
}

/// Generates a 128-bit random hex nonce.
fn fresh_nonce() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

// ============================================================================
// SECTION: Key Loading
// ============================================================================

/// Loads a private key from a raw-32-byte or base64 text file.
fn load_signing_key(path: &Path) -> Result<SigningKey, AuthorityError> {
    let bytes = read_key_bytes(path)?;
    let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| AuthorityError::KeyLoad {
        path: path.to_path_buf(),
        detail: "expected 32 key bytes".to_string(),
    })?;
    Ok(SigningKey::from_bytes(&bytes))
}

/// Loads a public key: 32 raw bytes or base64 text.
fn load_verifying_key(path: &Path) -> Result<VerifyingKey, AuthorityError> {
    let bytes = read_key_bytes(path)?;
    let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| AuthorityError::KeyLoad {
        path: path.to_path_buf(),
        detail: "expected 32 key bytes".to_string(),
    })?;
    VerifyingKey::from_bytes(&bytes).map_err(|err| AuthorityError::KeyLoad {
        path: path.to_path_buf(),
        detail: err.to_string(),
    })
}

/// Reads key material, accepting raw-32 or base64-encoded files.
fn read_key_bytes(path: &Path) -> Result<Vec<u8>, AuthorityError> {
    let bytes = std::fs::read(path).map_err(|err| AuthorityError::KeyLoad {
        path: path.to_path_buf(),
        detail: err.to_string(),
    })?;
    if bytes.len() == 32 {
        return Ok(bytes);
    }
    let text = std::str::from_utf8(&bytes).map_err(|_| AuthorityError::KeyLoad {
        path: path.to_path_buf(),
        detail: "key must be raw 32 bytes or base64 text".to_string(),
    })?;
    base64::engine::general_purpose::STANDARD
        .decode(text.trim())
        .map_err(|err| AuthorityError::KeyLoad {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions."
    )]

    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    use super::AuthorityError;
    use super::CredentialAuthority;
    use super::PlaneVerifier;
    use crate::route::Route;

    fn authority() -> CredentialAuthority {
        CredentialAuthority::from_keys(
            "wk-1",
            SigningKey::generate(&mut OsRng),
            "wk-2",
            SigningKey::generate(&mut OsRng),
            3_600,
        )
    }

    #[test]
    fn issue_then_verify_round_trips_the_route() {
        let authority = authority();
        for route in [Route::Production, Route::Shadow] {
            let token = authority.issue("s-1", "read_file", route, 1_000).expect("issue");
            assert_eq!(authority.verify(&token, 1_001).expect("verify"), route);
        }
    }

    #[test]
    fn exactly_one_plane_verifier_accepts_each_warrant() {
        let authority = authority();
        let production = authority.plane_verifier(Route::Production);
        let shadow = authority.plane_verifier(Route::Shadow);

        let token = authority.issue("s-1", "read_file", Route::Shadow, 1_000).expect("issue");
        assert!(production.verify(&token, 1_001).is_err());
        let claims = shadow.verify(&token, 1_001).expect("shadow accepts");
        assert_eq!(claims.sub, "s-1");
        assert_eq!(claims.tool, "read_file");

        let token = authority.issue("s-1", "read_file", Route::Production, 1_000).expect("issue");
        assert!(shadow.verify(&token, 1_001).is_err());
        assert!(production.verify(&token, 1_001).is_ok());
    }

    #[test]
    fn expiry_is_half_open() {
        let authority = authority();
        let token = authority.issue("s-1", "read_file", Route::Production, 1_000).expect("issue");
        // Valid strictly before exp, rejected exactly at exp.
        assert!(authority.verify(&token, 1_000 + 3_599).is_ok());
        assert!(authority.verify(&token, 1_000 + 3_600).is_err());
    }

    #[test]
    fn tampered_payload_fails_under_both_keys() {
        let authority = authority();
        let token = authority.issue("s-1", "read_file", Route::Production, 1_000).expect("issue");
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            br#"{"iss":"chimera","sub":"s-2","aud":"backend","tool":"read_file","iat":1000,"exp":9999,"jti":"00"}"#,
        );
        parts[1] = &forged;
        let tampered = parts.join(".");
        assert!(authority.verify(&tampered, 1_001).is_err());
        assert!(authority.plane_verifier(Route::Production).verify(&tampered, 1_001).is_err());
        assert!(authority.plane_verifier(Route::Shadow).verify(&tampered, 1_001).is_err());
    }

    #[test]
    fn unknown_kid_is_rejected_opaquely() {
        let authority = authority();
        let other = CredentialAuthority::from_keys(
            "wk-9",
            SigningKey::generate(&mut OsRng),
            "wk-8",
            SigningKey::generate(&mut OsRng),
            3_600,
        );
        let token = other.issue("s-1", "read_file", Route::Production, 1_000).expect("issue");
        assert!(matches!(
            authority.verify(&token, 1_001),
            Err(AuthorityError::Verification)
        ));
    }

    #[test]
    fn nonces_are_fresh_per_warrant() {
        let authority = authority();
        let first = authority.issue("s-1", "read_file", Route::Production, 1_000).expect("issue");
        let second = authority.issue("s-1", "read_file", Route::Production, 1_000).expect("issue");
        assert_ne!(first, second);
    }

    #[test]
    fn plane_verifier_checks_kid_before_signature() {
        let production_key = SigningKey::generate(&mut OsRng);
        let authority = CredentialAuthority::from_keys(
            "wk-1",
            production_key.clone(),
            "wk-2",
            SigningKey::generate(&mut OsRng),
            3_600,
        );
        let token = authority.issue("s-1", "read_file", Route::Production, 1_000).expect("issue");
        // Same public key, wrong kid label: still an opaque failure.
        let mislabeled = PlaneVerifier::new("wk-9", production_key.verifying_key());
        assert!(mislabeled.verify(&token, 1_001).is_err());
    }
}
