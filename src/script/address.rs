//! Base58Check address strings over a [`Hash160`], generalizing the teacher's
//! `wallet::address_from_public_key` (SHA256 + RIPEMD160) with the
//! version-byte + checksum envelope its (pack-absent) `b58c_to_address`
//! helper implied. One version byte per network, as real Bitcoin-derived
//! networks do.

use base58check::{FromBase58Check, ToBase58Check};

use crate::hash::{hash160, Hash160};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressParams {
    pub pubkey_hash_version: u8,
    pub script_hash_version: u8,
}

impl AddressParams {
    pub const fn mainnet() -> Self {
        AddressParams {
            pubkey_hash_version: 60,
            script_hash_version: 122,
        }
    }

    pub const fn testnet() -> Self {
        AddressParams {
            pubkey_hash_version: 111,
            script_hash_version: 196,
        }
    }
}

/// Derives the HASH160 key hash an address string would encode.
pub fn pubkey_hash(public_key: &[u8]) -> Hash160 {
    hash160(public_key)
}

pub fn encode_pubkey_hash(hash: Hash160, params: &AddressParams) -> String {
    hash.to_vec().to_base58check(params.pubkey_hash_version)
}

pub fn encode_script_hash(hash: Hash160, params: &AddressParams) -> String {
    hash.to_vec().to_base58check(params.script_hash_version)
}

/// Decodes an address string into its key/script hash, returning `None` if
/// the checksum fails or the payload isn't exactly 20 bytes.
pub fn decode(address: &str) -> Option<(u8, Hash160)> {
    let (version, payload) = address.to_owned().from_base58check().ok()?;
    if payload.len() != 20 {
        return None;
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&payload);
    Some((version, out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_pubkey_hash_address() {
        let params = AddressParams::testnet();
        let hash = pubkey_hash(b"a fake public key");
        let addr = encode_pubkey_hash(hash, &params);
        let (version, decoded) = decode(&addr).unwrap();
        assert_eq!(version, params.pubkey_hash_version);
        assert_eq!(decoded, hash);
    }
}
