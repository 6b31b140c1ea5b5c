//! Symmetric key handling and the cipher token format used by the encrypt operator
//!
//! A token is `base64url_nopad(version || nonce || ciphertext || tag)` followed by
//! a `.` terminator. The AEAD is AES-256-GCM keyed through HKDF-SHA256 from the
//! raw key material, so 128, 192 and 256-bit keys are all accepted.
//!
//! With deterministic nonces the nonce is an HMAC of the plaintext under a
//! key-derived MAC key. Equal plaintexts then produce equal tokens: output is
//! reproducible across runs, at the cost of revealing equality between values.

use crate::error::{DecodeFailureReason, EngineError, EngineResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use regex::Regex;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::{hkdf, hmac};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::{Arc, OnceLock};

pub const TOKEN_VERSION: u8 = 1;
pub const TOKEN_TERMINATOR: char = '.';

/// Locate pattern for version 1 tokens.
///
/// The shortest payload (one plaintext byte) is 30 bytes, which encodes to 40
/// base64url characters. The pattern has no left boundary: a match may start
/// inside a word that runs straight into the token.
pub const LOCATE_PATTERN_V1: &str = r"[A-Za-z0-9_-]{40,}\.";

/// Shortest possible token, terminator included.
pub const MIN_TOKEN_LEN: usize = 41;

const TAG_LEN: usize = 16;
const MIN_PAYLOAD_LEN: usize = 1 + NONCE_LEN + TAG_LEN;
const HKDF_SALT: &[u8] = b"pii-veil/token/v1";
const AEAD_INFO: &[&[u8]] = &[b"aead"];
const NONCE_INFO: &[&[u8]] = &[b"nonce"];

pub const VALID_KEY_LENGTHS: [usize; 3] = [16, 24, 32];

pub fn locate_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(LOCATE_PATTERN_V1).expect("locate pattern is a valid regex"))
}

struct CipherKeys {
    aead: LessSafeKey,
    nonce_mac: hmac::Key,
}

/// Raw key material plus the keys derived from it.
///
/// Cloning is cheap; derived keys are shared.
#[derive(Clone)]
pub struct EncryptionKey {
    material: Arc<[u8]>,
    keys: Arc<CipherKeys>,
}

impl EncryptionKey {
    pub fn new(material: &[u8]) -> EngineResult<Self> {
        if !VALID_KEY_LENGTHS.contains(&material.len()) {
            return Err(EngineError::InvalidKeyLength { len: material.len() });
        }

        let prk = hkdf::Salt::new(hkdf::HKDF_SHA256, HKDF_SALT).extract(material);
        let aead_okm = prk
            .expand(AEAD_INFO, &AES_256_GCM)
            .map_err(|_| EngineError::configuration("failed to derive cipher key"))?;
        let mac_okm = prk
            .expand(NONCE_INFO, hmac::HMAC_SHA256)
            .map_err(|_| EngineError::configuration("failed to derive nonce key"))?;

        let aead = LessSafeKey::new(UnboundKey::from(aead_okm));
        let nonce_mac = hmac::Key::from(mac_okm);

        Ok(Self {
            material: Arc::from(material),
            keys: Arc::new(CipherKeys { aead, nonce_mac }),
        })
    }

    /// Derives a 256-bit key from a configuration seed (SHA-256 of the seed).
    ///
    /// This is reproducible by construction and is not a key management scheme.
    pub fn from_seed(seed: &str) -> EngineResult<Self> {
        let digest = Sha256::digest(seed.as_bytes());
        Self::new(&digest)
    }

    pub fn len(&self) -> usize {
        self.material.len()
    }

    pub fn is_empty(&self) -> bool {
        self.material.is_empty()
    }

    /// Short non-reversible identifier of the key, safe to log.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.material);
        digest[..4].iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn encrypt(&self, plaintext: &str, deterministic: bool) -> EngineResult<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        if deterministic {
            let tag = hmac::sign(&self.keys.nonce_mac, plaintext.as_bytes());
            nonce_bytes.copy_from_slice(&tag.as_ref()[..NONCE_LEN]);
        } else {
            OsRng.fill_bytes(&mut nonce_bytes);
        }

        let mut in_out = plaintext.as_bytes().to_vec();
        self.keys
            .aead
            .seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce_bytes), Aad::empty(), &mut in_out)
            .map_err(|_| EngineError::configuration("encryption failed"))?;

        let mut payload = Vec::with_capacity(1 + NONCE_LEN + in_out.len());
        payload.push(TOKEN_VERSION);
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&in_out);

        let mut token = URL_SAFE_NO_PAD.encode(payload);
        token.push(TOKEN_TERMINATOR);
        Ok(token)
    }

    pub fn decrypt(&self, token: &str) -> Result<String, DecodeFailureReason> {
        let body = token.strip_suffix(TOKEN_TERMINATOR).unwrap_or(token);
        let payload = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| DecodeFailureReason::MalformedToken)?;

        if payload.len() < MIN_PAYLOAD_LEN {
            return Err(DecodeFailureReason::MalformedToken);
        }
        if payload[0] != TOKEN_VERSION {
            return Err(DecodeFailureReason::UnsupportedVersion(payload[0]));
        }

        let (nonce_bytes, sealed) = payload[1..].split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| DecodeFailureReason::MalformedToken)?;

        let mut in_out = sealed.to_vec();
        let plaintext = self
            .keys
            .aead
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| DecodeFailureReason::AuthenticationFailed)?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| DecodeFailureReason::InvalidUtf8)
    }
}

impl PartialEq for EncryptionKey {
    fn eq(&self, other: &Self) -> bool {
        self.material == other.material
    }
}

impl Eq for EncryptionKey {}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bits", &(self.material.len() * 8))
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}
