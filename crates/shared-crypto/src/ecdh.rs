//! # Channel Key Agreement
//!
//! Ephemeral P-256 ECDH followed by HKDF-SHA256.
//!
//! ```text
//! shared  = ECDH(server_eph, client_pub).x
//! okm     = HKDF-SHA256(salt = client_random || server_random,
//!                       ikm  = shared,
//!                       info = "api-v1-secure", L = 64)
//! enc_key = okm[0..32]
//! mac_key = okm[32..64]
//! ```
//!
//! Public keys travel as base64 of the SubjectPublicKeyInfo DER encoding.
//! Both sides run the same derivation; [`ClientHandshake`] is the mirror of
//! [`derive_channel_keys`].

use crate::encoding::{b64_decode, b64_encode};
use crate::keys::ChannelKeys;
use crate::symmetric::{SecretKey, KEY_LENGTH};
use crate::CryptoError;
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};
use p256::PublicKey;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

/// Length of the client and server randoms in bytes.
pub const CHANNEL_RANDOM_LENGTH: usize = 16;

/// HKDF info string. Bumping the protocol version changes this value.
pub const HKDF_INFO: &[u8] = b"api-v1-secure";

/// Server side of a completed key agreement.
#[derive(Debug)]
pub struct DerivedChannelKeys {
    /// Server ephemeral public key, base64(SPKI DER).
    pub server_public_key: String,
    /// Server random, base64 of 16 bytes.
    pub server_random: String,
    /// Derived channel keys. Hand to the key wrapper, never log.
    pub keys: ChannelKeys,
}

/// Derive channel keys from the client's handshake values.
///
/// # Errors
///
/// - `InvalidPublicKey` if the key is not base64 SPKI DER on P-256
/// - `InvalidClientRandom` if the random is not base64 of 16 bytes
pub fn derive_channel_keys(
    client_public_key: &str,
    client_random: &str,
) -> Result<DerivedChannelKeys, CryptoError> {
    let client_public = decode_public_key(client_public_key)?;
    let client_random = decode_random(client_random).ok_or(CryptoError::InvalidClientRandom {
        expected: CHANNEL_RANDOM_LENGTH,
    })?;

    let server_secret = EphemeralSecret::random(&mut OsRng);
    let server_public = encode_public_key(&server_secret.public_key())?;

    let mut server_random = [0u8; CHANNEL_RANDOM_LENGTH];
    OsRng.fill_bytes(&mut server_random);

    let shared = server_secret.diffie_hellman(&client_public);
    let keys = expand_keys(
        shared.raw_secret_bytes().as_slice(),
        &client_random,
        &server_random,
    )?;

    Ok(DerivedChannelKeys {
        server_public_key: server_public,
        server_random: b64_encode(server_random),
        keys,
    })
}

/// Client half of the handshake.
///
/// Holds the client's ephemeral secret until the server answers.
pub struct ClientHandshake {
    secret: EphemeralSecret,
    random: [u8; CHANNEL_RANDOM_LENGTH],
}

impl ClientHandshake {
    /// Fresh ephemeral key pair and random.
    pub fn new() -> Self {
        let mut random = [0u8; CHANNEL_RANDOM_LENGTH];
        OsRng.fill_bytes(&mut random);
        Self {
            secret: EphemeralSecret::random(&mut OsRng),
            random,
        }
    }

    /// Client public key as base64(SPKI DER).
    pub fn public_key_b64(&self) -> Result<String, CryptoError> {
        encode_public_key(&self.secret.public_key())
    }

    /// Client random as base64.
    pub fn random_b64(&self) -> String {
        b64_encode(self.random)
    }

    /// Complete the agreement with the server's handshake response.
    pub fn finish(
        &self,
        server_public_key: &str,
        server_random: &str,
    ) -> Result<ChannelKeys, CryptoError> {
        let server_public = decode_public_key(server_public_key)?;
        let server_random =
            decode_random(server_random).ok_or(CryptoError::InvalidServerRandom {
                expected: CHANNEL_RANDOM_LENGTH,
            })?;

        let shared = self.secret.diffie_hellman(&server_public);
        expand_keys(
            shared.raw_secret_bytes().as_slice(),
            &self.random,
            &server_random,
        )
    }
}

impl Default for ClientHandshake {
    fn default() -> Self {
        Self::new()
    }
}

fn expand_keys(
    shared_secret: &[u8],
    client_random: &[u8; CHANNEL_RANDOM_LENGTH],
    server_random: &[u8; CHANNEL_RANDOM_LENGTH],
) -> Result<ChannelKeys, CryptoError> {
    let mut salt = [0u8; CHANNEL_RANDOM_LENGTH * 2];
    salt[..CHANNEL_RANDOM_LENGTH].copy_from_slice(client_random);
    salt[CHANNEL_RANDOM_LENGTH..].copy_from_slice(server_random);

    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared_secret);
    let mut okm = Zeroizing::new([0u8; KEY_LENGTH * 2]);
    hkdf.expand(HKDF_INFO, &mut okm[..])
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let enc_key = SecretKey::from_slice(&okm[..KEY_LENGTH])?;
    let mac_key = SecretKey::from_slice(&okm[KEY_LENGTH..])?;
    Ok(ChannelKeys::new(enc_key, mac_key))
}

fn decode_public_key(value: &str) -> Result<PublicKey, CryptoError> {
    let der = b64_decode(value).ok_or(CryptoError::InvalidPublicKey)?;
    PublicKey::from_public_key_der(&der).map_err(|_| CryptoError::InvalidPublicKey)
}

fn encode_public_key(key: &PublicKey) -> Result<String, CryptoError> {
    let der = key
        .to_public_key_der()
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    Ok(b64_encode(der.as_bytes()))
}

fn decode_random(value: &str) -> Option<[u8; CHANNEL_RANDOM_LENGTH]> {
    b64_decode(value)?.as_slice().try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_and_server_agree() {
        let client = ClientHandshake::new();
        let derived =
            derive_channel_keys(&client.public_key_b64().unwrap(), &client.random_b64()).unwrap();

        let client_keys = client
            .finish(&derived.server_public_key, &derived.server_random)
            .unwrap();

        assert_eq!(client_keys, derived.keys);
        assert_ne!(client_keys.enc_key, client_keys.mac_key);
    }

    #[test]
    fn test_each_derivation_is_fresh() {
        let client = ClientHandshake::new();
        let pk = client.public_key_b64().unwrap();
        let random = client.random_b64();

        let a = derive_channel_keys(&pk, &random).unwrap();
        let b = derive_channel_keys(&pk, &random).unwrap();

        assert_ne!(a.server_public_key, b.server_public_key);
        assert_ne!(a.keys, b.keys);
    }

    #[test]
    fn test_bad_public_key_rejected() {
        let client = ClientHandshake::new();
        let random = client.random_b64();

        assert_eq!(
            derive_channel_keys("not-a-key", &random).unwrap_err(),
            CryptoError::InvalidPublicKey
        );
        assert_eq!(
            derive_channel_keys(&b64_encode([4u8; 65]), &random).unwrap_err(),
            CryptoError::InvalidPublicKey
        );
    }

    #[test]
    fn test_client_random_must_be_16_bytes() {
        let client = ClientHandshake::new();
        let pk = client.public_key_b64().unwrap();

        for bad in [b64_encode([0u8; 15]), b64_encode([0u8; 17]), "??".to_string()] {
            assert_eq!(
                derive_channel_keys(&pk, &bad).unwrap_err(),
                CryptoError::InvalidClientRandom { expected: 16 }
            );
        }
    }

    #[test]
    fn test_finish_rejects_bad_server_random() {
        let client = ClientHandshake::new();
        let server = ClientHandshake::new();
        let server_pk = server.public_key_b64().unwrap();

        assert_eq!(
            client
                .finish(&server_pk, &b64_encode([0u8; 8]))
                .unwrap_err(),
            CryptoError::InvalidServerRandom { expected: 16 }
        );
    }

    #[test]
    fn test_salt_order_matters() {
        let shared = [9u8; 32];
        let a = expand_keys(&shared, &[1u8; 16], &[2u8; 16]).unwrap();
        let b = expand_keys(&shared, &[2u8; 16], &[1u8; 16]).unwrap();
        assert_ne!(a, b);
    }
}
