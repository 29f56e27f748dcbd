//! Key generation, key import, key-file sealing and JWT signing/verification.
//!
//! Private keys are DER: PKCS#8 v2 for Ed25519 and P-256, PKCS#1
//! `RSAPrivateKey` for RSA. `jsonwebtoken` consumes them directly for
//! signing; verification takes the raw public bytes (Ed25519 point or
//! uncompressed P-256 point) or the RSA modulus and exponent.

use crate::errors::KeyError;
use crate::models::{KeyMaterial, PublicComponent};
use chrono::{DateTime, Utc};
use common::jwt::{decode_b64url, encode_b64url, TokenClaims};
use common::secret::{ExposeSecret, SecretBox, SecretString};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use ring::{
    aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM},
    rand::{SecureRandom, SystemRandom},
    signature::{
        EcdsaKeyPair, Ed25519KeyPair, KeyPair, RsaKeyPair, ECDSA_P256_SHA256_FIXED_SIGNING,
    },
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::instrument;

/// Length of an AES-256-GCM key, and of the key-file master key.
pub const MASTER_KEY_LEN: usize = 32;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// PKCS#8 v2 prefix for an Ed25519 private key (RFC 8410), followed by the
/// 32-byte seed.
const ED25519_PKCS8_PREFIX: [u8; 16] = [
    0x30, 0x53, 0x02, 0x01, 0x01, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22, 0x04, 0x20,
];

/// Tag introducing the public key, followed by the 32-byte public key.
const ED25519_PKCS8_PUBLIC_TAG: [u8; 5] = [0xa1, 0x23, 0x03, 0x21, 0x00];

/// Signing algorithms a key can carry.
///
/// `EdDsa` and `Es256` keys are minted by the rotator; `Ps512` keys can only
/// be imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    /// Ed25519 signatures.
    #[serde(rename = "EdDSA")]
    EdDsa,
    /// ECDSA over P-256 with SHA-256.
    #[serde(rename = "ES256")]
    Es256,
    /// RSASSA-PSS with SHA-512.
    #[serde(rename = "PS512")]
    Ps512,
}

impl KeyAlgorithm {
    /// JOSE `alg` name.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAlgorithm::EdDsa => "EdDSA",
            KeyAlgorithm::Es256 => "ES256",
            KeyAlgorithm::Ps512 => "PS512",
        }
    }

    /// True when [`generate_key_pair`] can mint keys for this algorithm.
    pub fn can_generate(&self) -> bool {
        matches!(self, KeyAlgorithm::EdDsa | KeyAlgorithm::Es256)
    }

    /// Parse a JOSE `alg` name; case-sensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "EdDSA" => Some(KeyAlgorithm::EdDsa),
            "ES256" => Some(KeyAlgorithm::Es256),
            "PS512" => Some(KeyAlgorithm::Ps512),
            _ => None,
        }
    }

    fn jwt_algorithm(self) -> Algorithm {
        match self {
            KeyAlgorithm::EdDsa => Algorithm::EdDSA,
            KeyAlgorithm::Es256 => Algorithm::ES256,
            KeyAlgorithm::Ps512 => Algorithm::PS512,
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of key generation or import: public coordinates plus private DER.
pub struct GeneratedKey {
    pub public_component: PublicComponent,
    pub private_der: SecretBox<Vec<u8>>,
}

impl GeneratedKey {
    /// Wrap as a pending [`KeyMaterial`].
    pub fn into_pending(
        self,
        key_id: String,
        algorithm: KeyAlgorithm,
        created_at: DateTime<Utc>,
    ) -> KeyMaterial {
        KeyMaterial::pending(
            key_id,
            algorithm,
            self.public_component,
            self.private_der,
            created_at,
        )
    }
}

impl fmt::Debug for GeneratedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedKey")
            .field("public_component", &self.public_component)
            .field("private_der", &"[REDACTED]")
            .finish()
    }
}

/// Generate a key pair for `algorithm` using the system CSPRNG.
#[instrument(skip_all, fields(algorithm = %algorithm))]
pub fn generate_key_pair(algorithm: KeyAlgorithm) -> Result<GeneratedKey, KeyError> {
    let rng = SystemRandom::new();

    match algorithm {
        KeyAlgorithm::EdDsa => {
            let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
                .map_err(|e| KeyError::KeyGeneration(format!("Keypair generation failed: {e}")))?;
            let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
                .map_err(|e| KeyError::KeyGeneration(format!("Keypair parsing failed: {e}")))?;

            Ok(GeneratedKey {
                public_component: PublicComponent::Ed25519 {
                    x: encode_b64url(key_pair.public_key().as_ref()),
                },
                private_der: SecretBox::new(Box::new(pkcs8.as_ref().to_vec())),
            })
        }
        KeyAlgorithm::Es256 => {
            let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
                .map_err(|e| KeyError::KeyGeneration(format!("Keypair generation failed: {e}")))?;
            let key_pair =
                EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
                    .map_err(|e| {
                        KeyError::KeyGeneration(format!("Keypair parsing failed: {e}"))
                    })?;

            Ok(GeneratedKey {
                public_component: p256_public_component(key_pair.public_key().as_ref())?,
                private_der: SecretBox::new(Box::new(pkcs8.as_ref().to_vec())),
            })
        }
        KeyAlgorithm::Ps512 => Err(KeyError::KeyGeneration(
            "PS512 keys cannot be generated, only imported".to_string(),
        )),
    }
}

/// Split an uncompressed SEC1 point (`0x04 || X || Y`) into JWK coordinates.
fn p256_public_component(point: &[u8]) -> Result<PublicComponent, KeyError> {
    match point.split_first() {
        Some((0x04, coords)) if coords.len() == 64 => {
            let (x, y) = coords.split_at(32);
            Ok(PublicComponent::P256 {
                x: encode_b64url(x),
                y: encode_b64url(y),
            })
        }
        _ => Err(KeyError::KeyGeneration(
            "Unexpected P-256 public key encoding".to_string(),
        )),
    }
}

/// Build an Ed25519 key from a 32-byte seed.
///
/// When `expected_public` is given the derived public key must match it.
pub fn ed25519_key_from_seed(
    seed: &[u8],
    expected_public: Option<&[u8]>,
) -> Result<GeneratedKey, KeyError> {
    let key_pair = match expected_public {
        Some(public) => Ed25519KeyPair::from_seed_and_public_key(seed, public),
        None => Ed25519KeyPair::from_seed_unchecked(seed),
    }
    .map_err(|e| KeyError::KeyGeneration(format!("Invalid Ed25519 key: {e}")))?;

    let public = key_pair.public_key().as_ref();
    let mut pkcs8 = Vec::with_capacity(85);
    pkcs8.extend_from_slice(&ED25519_PKCS8_PREFIX);
    pkcs8.extend_from_slice(seed);
    pkcs8.extend_from_slice(&ED25519_PKCS8_PUBLIC_TAG);
    pkcs8.extend_from_slice(public);

    // Round-trip through ring so a malformed document never reaches the store.
    Ed25519KeyPair::from_pkcs8(&pkcs8)
        .map_err(|e| KeyError::KeyGeneration(format!("PKCS#8 encoding failed: {e}")))?;

    Ok(GeneratedKey {
        public_component: PublicComponent::Ed25519 {
            x: encode_b64url(public),
        },
        private_der: SecretBox::new(Box::new(pkcs8)),
    })
}

#[derive(Deserialize)]
struct PrivateJwk {
    kty: String,
    crv: Option<String>,
    kid: Option<String>,
    alg: Option<String>,
    x: Option<String>,
    d: Option<String>,
    n: Option<String>,
    e: Option<String>,
    p: Option<String>,
    q: Option<String>,
    dp: Option<String>,
    dq: Option<String>,
    qi: Option<String>,
}

impl PrivateJwk {
    fn decode_param(value: Option<&str>, name: &str) -> Result<Vec<u8>, KeyError> {
        let value = value
            .ok_or_else(|| KeyError::KeyGeneration(format!("Private JWK is missing '{name}'")))?;
        decode_b64url(value)
            .map_err(|e| KeyError::KeyGeneration(format!("Invalid '{name}' encoding: {e}")))
    }

    fn check_alg(&self, expected: KeyAlgorithm) -> Result<(), KeyError> {
        match self.alg.as_deref() {
            Some(alg) if alg != expected.as_str() => Err(KeyError::KeyGeneration(format!(
                "Private JWK alg {alg} does not match {expected}"
            ))),
            _ => Ok(()),
        }
    }
}

/// Import a private JWK.
///
/// Accepts Ed25519 (`kty=OKP`, `crv=Ed25519`, `d`, optional `x`) imported as
/// EdDSA, and RSA (`kty=RSA` with all CRT parameters) imported as PS512. A
/// missing `kid` gets a random hex id. The key is returned pending with
/// `created_at = now`.
#[instrument(skip_all)]
pub fn import_private_jwk(json: &SecretString, now: DateTime<Utc>) -> Result<KeyMaterial, KeyError> {
    let jwk: PrivateJwk = serde_json::from_str(json.expose_secret())
        .map_err(|e| KeyError::KeyGeneration(format!("Private JWK is not valid JSON: {e}")))?;

    let (algorithm, generated) = match (jwk.kty.as_str(), jwk.crv.as_deref()) {
        ("OKP", Some("Ed25519")) => (KeyAlgorithm::EdDsa, import_ed25519_jwk(&jwk)?),
        ("RSA", _) => (KeyAlgorithm::Ps512, import_rsa_jwk(&jwk)?),
        (kty, crv) => {
            return Err(KeyError::KeyGeneration(format!(
                "Unsupported private JWK type: kty={kty} crv={}",
                crv.unwrap_or("none")
            )))
        }
    };

    let key_id = jwk
        .kid
        .filter(|kid| !kid.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

    Ok(generated.into_pending(key_id, algorithm, now))
}

fn import_ed25519_jwk(jwk: &PrivateJwk) -> Result<GeneratedKey, KeyError> {
    jwk.check_alg(KeyAlgorithm::EdDsa)?;

    let seed = SecretBox::new(Box::new(PrivateJwk::decode_param(jwk.d.as_deref(), "d")?));
    let public = jwk
        .x
        .as_deref()
        .map(decode_b64url)
        .transpose()
        .map_err(|e| KeyError::KeyGeneration(format!("Invalid 'x' encoding: {e}")))?;

    ed25519_key_from_seed(seed.expose_secret(), public.as_deref())
}

fn import_rsa_jwk(jwk: &PrivateJwk) -> Result<GeneratedKey, KeyError> {
    jwk.check_alg(KeyAlgorithm::Ps512)?;

    let n = PrivateJwk::decode_param(jwk.n.as_deref(), "n")?;
    let e = PrivateJwk::decode_param(jwk.e.as_deref(), "e")?;
    let mut body = der_unsigned_integer(&[0]);
    body.extend(der_unsigned_integer(&n));
    body.extend(der_unsigned_integer(&e));
    for (value, name) in [
        (jwk.d.as_deref(), "d"),
        (jwk.p.as_deref(), "p"),
        (jwk.q.as_deref(), "q"),
        (jwk.dp.as_deref(), "dp"),
        (jwk.dq.as_deref(), "dq"),
        (jwk.qi.as_deref(), "qi"),
    ] {
        let param = SecretBox::new(Box::new(PrivateJwk::decode_param(value, name)?));
        body.extend(der_unsigned_integer(param.expose_secret()));
    }
    let der = der_sequence(&body);

    // ring checks the CRT parameters are consistent with n and e.
    RsaKeyPair::from_der(&der)
        .map_err(|e| KeyError::KeyGeneration(format!("Invalid RSA private key: {e}")))?;

    Ok(GeneratedKey {
        public_component: PublicComponent::Rsa {
            n: encode_b64url(strip_leading_zeros(&n)),
            e: encode_b64url(strip_leading_zeros(&e)),
        },
        private_der: SecretBox::new(Box::new(der)),
    })
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(bytes.len().saturating_sub(1));
    bytes.get(start..).unwrap_or(bytes)
}

fn der_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }
    let bytes = len.to_be_bytes();
    let significant = strip_leading_zeros(&bytes);
    let mut out = Vec::with_capacity(significant.len() + 1);
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
    out
}

/// DER INTEGER for a big-endian unsigned value.
fn der_unsigned_integer(value: &[u8]) -> Vec<u8> {
    let value = strip_leading_zeros(value);
    let pad = value.first().map_or(true, |b| b & 0x80 != 0);
    let len = value.len() + usize::from(pad);

    let mut out = vec![0x02];
    out.extend(der_length(len));
    if pad {
        out.push(0x00);
    }
    out.extend_from_slice(value);
    out
}

fn der_sequence(body: &[u8]) -> Vec<u8> {
    let mut out = vec![0x30];
    out.extend(der_length(body.len()));
    out.extend_from_slice(body);
    out
}

/// AES-256-GCM sealed private key.
pub struct EncryptedKey {
    pub encrypted_data: SecretBox<Vec<u8>>,
    pub nonce: Vec<u8>,
    pub tag: Vec<u8>,
}

impl fmt::Debug for EncryptedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedKey")
            .field("encrypted_data", &"[REDACTED]")
            .field("nonce", &self.nonce.len())
            .field("tag", &self.tag.len())
            .finish()
    }
}

fn aead_key(master_key: &[u8]) -> Result<LessSafeKey, KeyError> {
    if master_key.len() != MASTER_KEY_LEN {
        return Err(KeyError::Persistence(format!(
            "Invalid master key length: {} (expected {MASTER_KEY_LEN})",
            master_key.len()
        )));
    }

    let unbound = UnboundKey::new(&AES_256_GCM, master_key)
        .map_err(|e| KeyError::Persistence(format!("Cipher key creation failed: {e}")))?;
    Ok(LessSafeKey::new(unbound))
}

/// Seal a private key under the master key with a random 96-bit nonce.
///
/// `aad` is authenticated but not encrypted; the key file passes the key id
/// so a sealed blob only opens under the key it was written for.
#[instrument(skip_all)]
pub fn encrypt_private_key(
    private_key: &[u8],
    master_key: &[u8],
    aad: &[u8],
) -> Result<EncryptedKey, KeyError> {
    let sealing_key = aead_key(master_key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|e| KeyError::Persistence(format!("Nonce generation failed: {e}")))?;

    let mut in_out = private_key.to_vec();
    sealing_key
        .seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::from(aad),
            &mut in_out,
        )
        .map_err(|e| KeyError::Persistence(format!("Encryption failed: {e}")))?;

    let tag_start = in_out
        .len()
        .checked_sub(TAG_LEN)
        .ok_or_else(|| KeyError::Persistence("Encryption produced invalid output".to_string()))?;
    let tag = in_out.split_off(tag_start);

    Ok(EncryptedKey {
        encrypted_data: SecretBox::new(Box::new(in_out)),
        nonce: nonce_bytes.to_vec(),
        tag,
    })
}

/// Open a key sealed by [`encrypt_private_key`] with the same `aad`.
#[instrument(skip_all)]
pub fn decrypt_private_key(
    encrypted: &EncryptedKey,
    master_key: &[u8],
    aad: &[u8],
) -> Result<SecretBox<Vec<u8>>, KeyError> {
    let opening_key = aead_key(master_key)?;

    let nonce_bytes: [u8; NONCE_LEN] = encrypted.nonce.as_slice().try_into().map_err(|_| {
        KeyError::Persistence(format!(
            "Invalid nonce length: {} (expected {NONCE_LEN})",
            encrypted.nonce.len()
        ))
    })?;
    if encrypted.tag.len() != TAG_LEN {
        return Err(KeyError::Persistence(format!(
            "Invalid tag length: {} (expected {TAG_LEN})",
            encrypted.tag.len()
        )));
    }

    let mut in_out = encrypted.encrypted_data.expose_secret().clone();
    in_out.extend_from_slice(&encrypted.tag);

    let plaintext = opening_key
        .open_in_place(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::from(aad),
            &mut in_out,
        )
        .map_err(|e| KeyError::Persistence(format!("Decryption failed: {e}")))?;

    Ok(SecretBox::new(Box::new(plaintext.to_vec())))
}

/// Sign `claims` with a DER private key, stamping `kid` and `typ: JWT`.
#[instrument(skip_all)]
pub fn sign_jwt(
    claims: &TokenClaims,
    algorithm: KeyAlgorithm,
    private_key_der: &SecretBox<Vec<u8>>,
    key_id: &str,
) -> Result<String, KeyError> {
    let der = private_key_der.expose_secret();
    let encoding_key = match algorithm {
        KeyAlgorithm::EdDsa => EncodingKey::from_ed_der(der),
        KeyAlgorithm::Es256 => EncodingKey::from_ec_der(der),
        KeyAlgorithm::Ps512 => EncodingKey::from_rsa_der(der),
    };

    let mut header = Header::new(algorithm.jwt_algorithm());
    header.typ = Some("JWT".to_string());
    header.kid = Some(key_id.to_string());

    encode(&header, claims, &encoding_key)
        .map_err(|e| KeyError::Signing(format!("JWT signing operation failed: {e}")))
}

fn decoding_key(public: &PublicComponent) -> Result<DecodingKey, KeyError> {
    let invalid = |e: base64::DecodeError| {
        tracing::debug!(target: "jwks.crypto", error = %e, "Stored public key is not valid base64url");
        KeyError::SignatureMismatch
    };

    match public {
        PublicComponent::Ed25519 { x } => Ok(DecodingKey::from_ed_der(&decode_b64url(x).map_err(invalid)?)),
        PublicComponent::P256 { x, y } => {
            let mut point = Vec::with_capacity(65);
            point.push(0x04);
            point.extend(decode_b64url(x).map_err(invalid)?);
            point.extend(decode_b64url(y).map_err(invalid)?);
            Ok(DecodingKey::from_ec_der(&point))
        }
        PublicComponent::Rsa { n, e } => DecodingKey::from_rsa_components(n, e).map_err(|err| {
            tracing::debug!(target: "jwks.crypto", error = %err, "Stored RSA public key is invalid");
            KeyError::SignatureMismatch
        }),
    }
}

/// Verify the signature, `alg`, `iss` and `aud` of `token` against `key`.
///
/// Time claims (`exp`, `nbf`, `iat`) are only checked for presence here;
/// callers validate them against their own `now`.
#[instrument(skip_all)]
pub fn verify_jwt(
    token: &str,
    key: &KeyMaterial,
    issuer: &str,
    audience: &str,
) -> Result<TokenClaims, KeyError> {
    let decoding_key = decoding_key(&key.public_component)?;

    let mut validation = Validation::new(key.algorithm.jwt_algorithm());
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.set_issuer(&[issuer]);
    validation.set_audience(&[audience]);
    validation.set_required_spec_claims(&["exp", "nbf", "iat", "iss", "aud", "sub"]);

    decode::<TokenClaims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::InvalidKeyFormat
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Crypto(_) => {
                tracing::debug!(target: "jwks.crypto", error = %e, "Signature verification failed");
                KeyError::SignatureMismatch
            }
            _ => {
                tracing::debug!(target: "jwks.crypto", error = %e, "Claim validation failed");
                KeyError::InvalidClaims(e.to_string())
            }
        })
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use chrono::Duration;

    const ISS: &str = "JWT API Simulation";
    const AUD: &str = "JWT API Simulation";

    fn claims_at(iat: i64) -> TokenClaims {
        TokenClaims {
            iss: ISS.to_string(),
            aud: AUD.to_string(),
            sub: "uid-1".to_string(),
            iat,
            nbf: iat - 2,
            exp: iat + 30,
            jti: "0123456789abcdef".to_string(),
        }
    }

    fn key_for(algorithm: KeyAlgorithm) -> KeyMaterial {
        generate_key_pair(algorithm)
            .unwrap()
            .into_pending("k-test".to_string(), algorithm, Utc::now())
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(KeyAlgorithm::from_name("EdDSA"), Some(KeyAlgorithm::EdDsa));
        assert_eq!(KeyAlgorithm::from_name("ES256"), Some(KeyAlgorithm::Es256));
        assert_eq!(KeyAlgorithm::from_name("eddsa"), None);
        assert_eq!(KeyAlgorithm::from_name("PS512"), Some(KeyAlgorithm::Ps512));
        assert_eq!(KeyAlgorithm::from_name("RS256"), None);
        assert_eq!(KeyAlgorithm::Es256.to_string(), "ES256");
        assert!(KeyAlgorithm::EdDsa.can_generate());
        assert!(!KeyAlgorithm::Ps512.can_generate());
    }

    #[test]
    fn test_generate_ps512_is_rejected() {
        assert!(matches!(
            generate_key_pair(KeyAlgorithm::Ps512),
            Err(KeyError::KeyGeneration(_))
        ));
    }

    #[test]
    fn test_generate_ed25519_public_component() {
        let generated = generate_key_pair(KeyAlgorithm::EdDsa).unwrap();
        match generated.public_component {
            PublicComponent::Ed25519 { x } => assert_eq!(decode_b64url(&x).unwrap().len(), 32),
            other => panic!("unexpected component {other:?}"),
        }
    }

    #[test]
    fn test_generate_p256_public_component() {
        let generated = generate_key_pair(KeyAlgorithm::Es256).unwrap();
        match generated.public_component {
            PublicComponent::P256 { x, y } => {
                assert_eq!(decode_b64url(&x).unwrap().len(), 32);
                assert_eq!(decode_b64url(&y).unwrap().len(), 32);
            }
            other => panic!("unexpected component {other:?}"),
        }
    }

    #[test]
    fn test_generated_keys_are_unique() {
        let a = generate_key_pair(KeyAlgorithm::EdDsa).unwrap();
        let b = generate_key_pair(KeyAlgorithm::EdDsa).unwrap();
        assert_ne!(a.public_component, b.public_component);
    }

    #[test]
    fn test_sign_and_verify_eddsa() {
        let key = key_for(KeyAlgorithm::EdDsa);
        let claims = claims_at(Utc::now().timestamp());

        let token = sign_jwt(&claims, key.algorithm, key.private_der().unwrap(), &key.key_id).unwrap();
        let verified = verify_jwt(&token, &key, ISS, AUD).unwrap();

        assert_eq!(verified, claims);
        assert_eq!(common::jwt::extract_kid(&token).unwrap(), "k-test");
    }

    #[test]
    fn test_sign_and_verify_es256() {
        let key = key_for(KeyAlgorithm::Es256);
        let claims = claims_at(Utc::now().timestamp());

        let token = sign_jwt(&claims, key.algorithm, key.private_der().unwrap(), &key.key_id).unwrap();
        assert_eq!(verify_jwt(&token, &key, ISS, AUD).unwrap(), claims);
    }

    #[test]
    fn test_verify_with_other_key_is_signature_mismatch() {
        let signer = key_for(KeyAlgorithm::EdDsa);
        let other = key_for(KeyAlgorithm::EdDsa);
        let token = sign_jwt(
            &claims_at(Utc::now().timestamp()),
            signer.algorithm,
            signer.private_der().unwrap(),
            &signer.key_id,
        )
        .unwrap();

        assert_eq!(verify_jwt(&token, &other, ISS, AUD), Err(KeyError::SignatureMismatch));
    }

    #[test]
    fn test_verify_rejects_algorithm_confusion() {
        let es_key = key_for(KeyAlgorithm::Es256);
        let ed_key = key_for(KeyAlgorithm::EdDsa);
        let token = sign_jwt(
            &claims_at(Utc::now().timestamp()),
            es_key.algorithm,
            es_key.private_der().unwrap(),
            &es_key.key_id,
        )
        .unwrap();

        assert_eq!(verify_jwt(&token, &ed_key, ISS, AUD), Err(KeyError::SignatureMismatch));
    }

    #[test]
    fn test_verify_rejects_wrong_audience_and_issuer() {
        let key = key_for(KeyAlgorithm::EdDsa);
        let token = sign_jwt(
            &claims_at(Utc::now().timestamp()),
            key.algorithm,
            key.private_der().unwrap(),
            &key.key_id,
        )
        .unwrap();

        assert!(matches!(
            verify_jwt(&token, &key, ISS, "someone-else"),
            Err(KeyError::InvalidClaims(_))
        ));
        assert!(matches!(
            verify_jwt(&token, &key, "someone-else", AUD),
            Err(KeyError::InvalidClaims(_))
        ));
    }

    #[test]
    fn test_verify_ignores_expiry_for_caller() {
        let key = key_for(KeyAlgorithm::EdDsa);
        let old = (Utc::now() - Duration::days(2)).timestamp();
        let token = sign_jwt(&claims_at(old), key.algorithm, key.private_der().unwrap(), &key.key_id).unwrap();

        assert_eq!(verify_jwt(&token, &key, ISS, AUD).unwrap().exp, old + 30);
    }

    #[test]
    fn test_tampered_payload_is_signature_mismatch() {
        let key = key_for(KeyAlgorithm::EdDsa);
        let token = sign_jwt(
            &claims_at(Utc::now().timestamp()),
            key.algorithm,
            key.private_der().unwrap(),
            &key.key_id,
        )
        .unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        let mut forged = claims_at(Utc::now().timestamp());
        forged.sub = "admin".to_string();
        let forged_payload = encode_b64url(&serde_json::to_vec(&forged).unwrap());
        let tampered = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert_eq!(verify_jwt(&tampered, &key, ISS, AUD), Err(KeyError::SignatureMismatch));
    }

    #[test]
    fn test_seed_key_is_deterministic() {
        let a = ed25519_key_from_seed(&[7u8; 32], None).unwrap();
        let b = ed25519_key_from_seed(&[7u8; 32], None).unwrap();

        assert_eq!(a.public_component, b.public_component);
        assert_eq!(a.private_der.expose_secret().len(), 85);
    }

    #[test]
    fn test_seed_key_rejects_mismatched_public() {
        let other = ed25519_key_from_seed(&[8u8; 32], None).unwrap();
        let PublicComponent::Ed25519 { x } = other.public_component else {
            panic!("expected Ed25519");
        };
        let wrong_public = decode_b64url(&x).unwrap();

        assert!(matches!(
            ed25519_key_from_seed(&[7u8; 32], Some(&wrong_public)),
            Err(KeyError::KeyGeneration(_))
        ));
    }

    #[test]
    fn test_import_private_jwk_round_trip() {
        let reference = ed25519_key_from_seed(&[9u8; 32], None).unwrap();
        let PublicComponent::Ed25519 { x } = &reference.public_component else {
            panic!("expected Ed25519");
        };
        let json = format!(
            r#"{{"kty":"OKP","crv":"Ed25519","kid":"imported-1","d":"{}","x":"{}"}}"#,
            encode_b64url(&[9u8; 32]),
            x
        );

        let key = import_private_jwk(&SecretString::from(json), Utc::now()).unwrap();

        assert_eq!(key.key_id, "imported-1");
        assert_eq!(key.public_component, reference.public_component);
        assert_eq!(key.algorithm, KeyAlgorithm::EdDsa);
    }

    #[test]
    fn test_import_private_jwk_generates_kid() {
        let json = format!(
            r#"{{"kty":"OKP","crv":"Ed25519","d":"{}"}}"#,
            encode_b64url(&[3u8; 32])
        );
        let key = import_private_jwk(&SecretString::from(json), Utc::now()).unwrap();

        assert_eq!(key.key_id.len(), 32);
        assert!(key.key_id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    const RSA_PRIVATE_JWK: &str =
        include_str!("../../../jwks-test-utils/fixtures/rsa_private_jwk.json");

    fn rsa_jwk_value() -> serde_json::Value {
        serde_json::from_str(RSA_PRIVATE_JWK).unwrap()
    }

    #[test]
    fn test_import_rsa_private_jwk_as_ps512() {
        let expected = rsa_jwk_value();

        let key = import_private_jwk(&SecretString::from(RSA_PRIVATE_JWK), Utc::now()).unwrap();

        assert_eq!(key.key_id, "test-rsa-key-01");
        assert_eq!(key.algorithm, KeyAlgorithm::Ps512);
        assert_eq!(
            key.public_component,
            PublicComponent::Rsa {
                n: expected["n"].as_str().unwrap().to_string(),
                e: expected["e"].as_str().unwrap().to_string(),
            }
        );
    }

    #[test]
    fn test_sign_and_verify_ps512() {
        let key = import_private_jwk(&SecretString::from(RSA_PRIVATE_JWK), Utc::now()).unwrap();
        let claims = claims_at(Utc::now().timestamp());

        let token = sign_jwt(&claims, key.algorithm, key.private_der().unwrap(), &key.key_id).unwrap();

        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.alg, Algorithm::PS512);
        assert_eq!(verify_jwt(&token, &key, ISS, AUD).unwrap(), claims);
    }

    #[test]
    fn test_ps512_token_does_not_verify_under_eddsa_key() {
        let rsa = import_private_jwk(&SecretString::from(RSA_PRIVATE_JWK), Utc::now()).unwrap();
        let ed_key = key_for(KeyAlgorithm::EdDsa);
        let token = sign_jwt(
            &claims_at(Utc::now().timestamp()),
            rsa.algorithm,
            rsa.private_der().unwrap(),
            &rsa.key_id,
        )
        .unwrap();

        assert_eq!(verify_jwt(&token, &ed_key, ISS, AUD), Err(KeyError::SignatureMismatch));
    }

    #[test]
    fn test_import_rsa_rejects_inconsistent_parameters() {
        let mut jwk = rsa_jwk_value();
        jwk["n"] = serde_json::Value::String(encode_b64url(&[0xc3u8; 256]));

        assert!(matches!(
            import_private_jwk(&SecretString::from(jwk.to_string()), Utc::now()),
            Err(KeyError::KeyGeneration(msg)) if msg.contains("Invalid RSA private key")
        ));
    }

    #[test]
    fn test_import_rsa_requires_crt_parameters() {
        let mut jwk = rsa_jwk_value();
        jwk.as_object_mut().unwrap().remove("qi");

        assert!(matches!(
            import_private_jwk(&SecretString::from(jwk.to_string()), Utc::now()),
            Err(KeyError::KeyGeneration(msg)) if msg.contains("'qi'")
        ));
    }

    #[test]
    fn test_import_rsa_rejects_mismatched_alg() {
        let mut jwk = rsa_jwk_value();
        jwk["alg"] = serde_json::Value::String("RS256".to_string());

        assert!(matches!(
            import_private_jwk(&SecretString::from(jwk.to_string()), Utc::now()),
            Err(KeyError::KeyGeneration(_))
        ));
    }

    #[test]
    fn test_import_private_jwk_rejects_unknown_kty() {
        let json = r#"{"kty":"EC","crv":"P-256","x":"abc","y":"def","d":"xyz"}"#;
        assert!(matches!(
            import_private_jwk(&SecretString::from(json), Utc::now()),
            Err(KeyError::KeyGeneration(msg)) if msg.contains("kty=EC")
        ));
    }

    #[test]
    fn test_der_integer_encoding() {
        assert_eq!(der_unsigned_integer(&[0]), vec![0x02, 0x01, 0x00]);
        assert_eq!(der_unsigned_integer(&[0x00, 0x00, 0x7f]), vec![0x02, 0x01, 0x7f]);
        assert_eq!(der_unsigned_integer(&[0x80]), vec![0x02, 0x02, 0x00, 0x80]);
        assert_eq!(der_length(0x7f), vec![0x7f]);
        assert_eq!(der_length(0x80), vec![0x81, 0x80]);
        assert_eq!(der_length(0x0101), vec![0x82, 0x01, 0x01]);
    }

    #[test]
    fn test_import_private_jwk_requires_d() {
        let json = r#"{"kty":"OKP","crv":"Ed25519","x":"abc"}"#;
        assert!(matches!(
            import_private_jwk(&SecretString::from(json), Utc::now()),
            Err(KeyError::KeyGeneration(_))
        ));
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let master_key = [0x42u8; MASTER_KEY_LEN];
        let generated = generate_key_pair(KeyAlgorithm::EdDsa).unwrap();
        let plaintext = generated.private_der.expose_secret();

        let sealed = encrypt_private_key(plaintext, &master_key, b"k-1").unwrap();
        assert_eq!(sealed.nonce.len(), NONCE_LEN);
        assert_eq!(sealed.tag.len(), TAG_LEN);
        assert_ne!(sealed.encrypted_data.expose_secret(), plaintext);

        let opened = decrypt_private_key(&sealed, &master_key, b"k-1").unwrap();
        assert_eq!(opened.expose_secret(), plaintext);
    }

    #[test]
    fn test_decrypt_under_other_key_id_fails() {
        let master_key = [0x42u8; MASTER_KEY_LEN];
        let sealed = encrypt_private_key(b"pkcs8-bytes", &master_key, b"k-1").unwrap();

        assert!(matches!(
            decrypt_private_key(&sealed, &master_key, b"k-2"),
            Err(KeyError::Persistence(msg)) if msg.contains("Decryption failed")
        ));
    }

    #[test]
    fn test_decrypt_with_wrong_master_key_fails() {
        let sealed = encrypt_private_key(b"pkcs8-bytes", &[1u8; MASTER_KEY_LEN], b"k-1").unwrap();
        assert!(matches!(
            decrypt_private_key(&sealed, &[2u8; MASTER_KEY_LEN], b"k-1"),
            Err(KeyError::Persistence(_))
        ));
    }

    #[test]
    fn test_encrypt_rejects_short_master_key() {
        assert!(matches!(
            encrypt_private_key(b"pkcs8-bytes", &[1u8; 16], b"k-1"),
            Err(KeyError::Persistence(msg)) if msg.contains("expected 32")
        ));
    }

    #[test]
    fn test_decrypt_rejects_bad_nonce_length() {
        let mut sealed = encrypt_private_key(b"pkcs8-bytes", &[1u8; MASTER_KEY_LEN], b"k-1").unwrap();
        sealed.nonce.truncate(8);
        assert!(matches!(
            decrypt_private_key(&sealed, &[1u8; MASTER_KEY_LEN], b"k-1"),
            Err(KeyError::Persistence(msg)) if msg.contains("nonce")
        ));
    }
}
