//! Hash and elliptic-curve collaborators. Thin, deterministic, thread-safe
//! wrappers; the search core never touches curve math directly.

use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::SecretKey;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::types::{CompressedPublicKey, Hash160, Hash256, PrivateKey, PublicKey};

pub fn sha256(data: &[u8]) -> Hash256 {
    Hash256::from_slice(&Sha256::digest(data))
}

/// SHA256(SHA256(data)), used for Base58Check checksums.
pub fn sha256d(data: &[u8]) -> Hash256 {
    Hash256::from_slice(&Sha256::digest(Sha256::digest(data)))
}

pub fn ripemd160(data: &[u8]) -> Hash160 {
    Hash160::from_slice(&Ripemd160::digest(data))
}

/// RIPEMD160(SHA256(data)), the address hash.
pub fn hash160(data: &[u8]) -> Hash160 {
    Hash160::from_slice(&Ripemd160::digest(Sha256::digest(data)))
}

/// Derive both public key encodings for a private key. Fails with
/// `Error::Crypto` for zero or out-of-order scalars.
pub fn derive_pubkeys(key: &PrivateKey) -> Result<(PublicKey, CompressedPublicKey)> {
    let secret = SecretKey::from_slice(key.as_bytes())
        .map_err(|e| Error::Crypto(format!("invalid private key: {e}")))?;
    let public = secret.public_key();
    let uncompressed = public.to_encoded_point(false);
    let compressed = public.to_encoded_point(true);
    Ok((
        PublicKey::from_slice(uncompressed.as_bytes()),
        CompressedPublicKey::from_slice(compressed.as_bytes()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Key 1 and key 2 vectors, cross-checked against Bitcoin Core.
    const KEY1_COMPRESSED_HASH: &str = "751e76e8199196d454941c45d1b3a323f1433bd6";
    const KEY2_COMPRESSED_HASH: &str = "06afd46bcdfd22ef94ac122aa11f241244a37ecc";

    fn key(n: u8) -> PrivateKey {
        let mut bytes = [0u8; 32];
        bytes[31] = n;
        PrivateKey::from_bytes(bytes)
    }

    #[test]
    fn test_hash160_of_known_keys() {
        for (n, expected) in [(1u8, KEY1_COMPRESSED_HASH), (2u8, KEY2_COMPRESSED_HASH)] {
            let (_, compressed) = derive_pubkeys(&key(n)).unwrap();
            let hash = hash160(compressed.as_bytes());
            assert_eq!(hash.to_hex(), expected, "key {n}");
        }
    }

    #[test]
    fn test_pubkey_encodings() {
        let (uncompressed, compressed) = derive_pubkeys(&key(1)).unwrap();
        assert_eq!(uncompressed.as_bytes()[0], 0x04);
        assert!(matches!(compressed.as_bytes()[0], 0x02 | 0x03));
    }

    #[test]
    fn test_zero_key_rejected() {
        let err = derive_pubkeys(&PrivateKey::new());
        assert!(matches!(err, Err(Error::Crypto(_))));
    }

    #[test]
    fn test_sha256d() {
        // double-SHA256 of empty input
        let d = sha256d(b"");
        assert_eq!(
            d.to_hex(),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn test_derive_is_deterministic() {
        let a = derive_pubkeys(&key(42)).unwrap();
        let b = derive_pubkeys(&key(42)).unwrap();
        assert_eq!(a.0, b.0);
        assert_eq!(a.1, b.1);
    }
}
