//! Key generation, signing, and address encoding.
//!
//! Grounded on `labs/49-digital-signatures` and `labs/50-wallet-cli`'s
//! key-pair shape, but corrected per the specification: the curve is P-256
//! (not secp256k1), the signature format is raw `r||s` (not DER), and the
//! sign-data digest is always SHA-256 — never the MD5 variant the original
//! implementation also contained.

use demo_node_types::{Hash32, PubkeyHash};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid public key bytes")]
    InvalidPublicKey,
    #[error("invalid signature bytes")]
    InvalidSignature,
    #[error("invalid address: {0}")]
    InvalidAddress(&'static str),
}

/// A P-256 key pair: `signing_key` must remain secret, `verifying_key` is
/// shared as the public key.
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new key pair using OS randomness.
    pub fn generate() -> Self {
        KeyPair {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        KeyPair { signing_key }
    }

    /// Load a key pair from a raw 32-byte P-256 scalar. Key generation and
    /// storage are a wallet concern outside this crate's scope; this just
    /// lets a caller hand in a scalar it already holds.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let signing_key = SigningKey::from_slice(bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(KeyPair { signing_key })
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        *self.signing_key.verifying_key()
    }

    /// The public key in its compressed SEC1 encoding — this is the byte
    /// string carried in `TxInput::pubkey` and hashed into addresses.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.verifying_key().to_encoded_point(true).as_bytes().to_vec()
    }

    pub fn address(&self) -> String {
        address_from_pubkey(&self.public_key_bytes())
    }

    /// Sign a 32-byte digest, returning the raw `r||s` concatenation (each
    /// half occupying half the signature length, per the wire format).
    pub fn sign_digest(&self, digest: &Hash32) -> Vec<u8> {
        let signature: Signature = self.signing_key.sign(digest);
        signature.to_bytes().to_vec()
    }
}

/// Verify a raw `r||s` signature over a 32-byte digest against a compressed
/// SEC1 public key.
pub fn verify_signature(digest: &Hash32, signature: &[u8], pubkey: &[u8]) -> Result<bool, CryptoError> {
    let verifying_key =
        VerifyingKey::from_sec1_bytes(pubkey).map_err(|_| CryptoError::InvalidPublicKey)?;
    let signature =
        Signature::from_slice(signature).map_err(|_| CryptoError::InvalidSignature)?;
    Ok(verifying_key.verify(digest, &signature).is_ok())
}

/// `ripemd160(sha256(pubkey))` — the value locked into a `TxOutput`.
pub fn pubkey_hash(pubkey: &[u8]) -> PubkeyHash {
    let sha = Sha256::digest(pubkey);
    let ripe = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&ripe);
    out
}

const ADDRESS_CHECKSUM_LEN: usize = 4;

fn checksum(versioned_hash: &[u8]) -> [u8; ADDRESS_CHECKSUM_LEN] {
    let first = Sha256::digest(versioned_hash);
    let second = Sha256::digest(first);
    let mut out = [0u8; ADDRESS_CHECKSUM_LEN];
    out.copy_from_slice(&second[..ADDRESS_CHECKSUM_LEN]);
    out
}

/// `Base58Check(version_byte || ripemd160(sha256(pubkey)) || checksum[0..4])`.
pub fn address_from_pubkey(pubkey: &[u8]) -> String {
    address_from_pubkey_hash(&pubkey_hash(pubkey))
}

pub fn address_from_pubkey_hash(hash: &PubkeyHash) -> String {
    let mut versioned = Vec::with_capacity(1 + 20);
    versioned.push(demo_node_types::constants::ADDRESS_VERSION);
    versioned.extend_from_slice(hash);
    let check = checksum(&versioned);
    versioned.extend_from_slice(&check);
    bs58::encode(versioned).into_string()
}

/// Decode and validate a Base58Check address, returning its pubkey hash.
pub fn address_to_pubkey_hash(address: &str) -> Result<PubkeyHash, CryptoError> {
    let decoded = bs58::decode(address)
        .into_vec()
        .map_err(|_| CryptoError::InvalidAddress("not valid base58"))?;
    if decoded.len() != 1 + 20 + ADDRESS_CHECKSUM_LEN {
        return Err(CryptoError::InvalidAddress("wrong length"));
    }
    let (versioned, check) = decoded.split_at(1 + 20);
    let expected = checksum(versioned);
    if check != expected {
        return Err(CryptoError::InvalidAddress("bad checksum"));
    }
    if versioned[0] != demo_node_types::constants::ADDRESS_VERSION {
        return Err(CryptoError::InvalidAddress("bad version byte"));
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&versioned[1..]);
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let kp = KeyPair::generate();
        let digest = Sha256::digest(b"hello").into();
        let sig = kp.sign_digest(&digest);
        assert!(verify_signature(&digest, &sig, &kp.public_key_bytes()).unwrap());
    }

    #[test]
    fn tampered_digest_fails_verification() {
        let kp = KeyPair::generate();
        let digest: Hash32 = Sha256::digest(b"hello").into();
        let sig = kp.sign_digest(&digest);
        let mut other_digest = digest;
        other_digest[0] ^= 0x01;
        assert!(!verify_signature(&other_digest, &sig, &kp.public_key_bytes()).unwrap());
    }

    #[test]
    fn raw_signature_is_two_equal_halves() {
        let kp = KeyPair::generate();
        let digest = Sha256::digest(b"x").into();
        let sig = kp.sign_digest(&digest);
        assert_eq!(sig.len() % 2, 0);
    }

    #[test]
    fn address_round_trips() {
        let kp = KeyPair::generate();
        let address = kp.address();
        let hash = address_to_pubkey_hash(&address).unwrap();
        assert_eq!(hash, pubkey_hash(&kp.public_key_bytes()));
    }

    #[test]
    fn from_bytes_round_trips_with_generate() {
        let kp = KeyPair::generate();
        let bytes = kp.signing_key.to_bytes();
        let reloaded = KeyPair::from_bytes(&bytes).unwrap();
        assert_eq!(reloaded.public_key_bytes(), kp.public_key_bytes());
    }

    #[test]
    fn corrupted_address_rejected() {
        let kp = KeyPair::generate();
        let mut address = kp.address().into_bytes();
        let last = address.len() - 1;
        address[last] = if address[last] == b'1' { b'2' } else { b'1' };
        let address = String::from_utf8(address).unwrap();
        assert!(address_to_pubkey_hash(&address).is_err());
    }
}
