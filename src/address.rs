//! Address codec collaborators: Base58Check, bech32 v0 and WIF.

use bech32::{u5, Variant};

use crate::crypto::sha256d;
use crate::types::{Hash160, PrivateKey};

/// Mainnet P2PKH version byte.
pub const VERSION_P2PKH: u8 = 0x00;
/// Mainnet P2SH version byte.
pub const VERSION_P2SH: u8 = 0x05;

/// Base58Check-encode a hash160 under the given version byte.
pub fn encode_p2pkh(hash: &Hash160, version: u8) -> String {
    let mut data = Vec::with_capacity(25);
    data.push(version);
    data.extend_from_slice(hash.as_bytes());
    let checksum = sha256d(&data);
    data.extend_from_slice(&checksum.as_bytes()[..4]);
    bs58::encode(data).into_string()
}

/// Bech32 segwit v0 encoding (`bc1q...` for mainnet, `tb1q...` for testnet).
pub fn encode_p2wpkh(hash: &Hash160, hrp: &str) -> String {
    let converted = bech32::convert_bits(hash.as_bytes(), 8, 5, true).expect("8-to-5 regrouping");
    let mut data = vec![u5::try_from_u8(0).unwrap()];
    for b in converted {
        data.push(u5::try_from_u8(b).unwrap());
    }
    bech32::encode(hrp, data, Variant::Bech32).expect("valid hrp")
}

/// Decode any supported address form to (version, hash160). Bech32 results
/// use a pseudo-version of `0xff` since segwit has no version byte.
/// None for unsupported forms, bad checksums or non-20-byte programs.
pub fn decode_address(addr: &str) -> Option<(u8, Hash160)> {
    if addr.starts_with("bc1q") || addr.starts_with("tb1q") {
        return decode_bech32(addr);
    }
    decode_base58check(addr)
}

fn decode_base58check(addr: &str) -> Option<(u8, Hash160)> {
    let decoded = bs58::decode(addr).into_vec().ok()?;
    if decoded.len() != 25 {
        return None;
    }
    let checksum = sha256d(&decoded[..21]);
    if checksum.as_bytes()[..4] != decoded[21..] {
        return None;
    }
    Some((decoded[0], Hash160::from_slice(&decoded[1..21])))
}

fn decode_bech32(addr: &str) -> Option<(u8, Hash160)> {
    let (hrp, data, variant) = bech32::decode(addr).ok()?;
    if (hrp != "bc" && hrp != "tb") || variant != Variant::Bech32 {
        return None;
    }
    if data.is_empty() || data[0].to_u8() != 0 {
        return None;
    }
    let program = bech32::convert_bits(&data[1..], 5, 8, false).ok()?;
    if program.len() != 20 {
        return None;
    }
    Some((0xff, Hash160::from_slice(&program)))
}

/// Wallet Import Format for a found private key. Compressed WIFs start with
/// K/L, uncompressed with 5.
pub fn to_wif(key: &PrivateKey, compressed: bool) -> String {
    let mut data = Vec::with_capacity(38);
    data.push(0x80);
    data.extend_from_slice(key.as_bytes());
    if compressed {
        data.push(0x01);
    }
    let checksum = sha256d(&data);
    data.extend_from_slice(&checksum.as_bytes()[..4]);
    bs58::encode(data).into_string()
}
