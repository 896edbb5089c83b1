use mweb_consensus::Hash256;
use sha2::{Digest, Sha256};

use crate::encoding::{encode, Encodable};

pub fn sha256(data: &[u8]) -> Hash256 {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Double SHA-256, the hash used for every consensus structure.
pub fn sha256d(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

pub fn hashed_bytes(data: &[u8]) -> Hash256 {
    sha256d(data)
}

/// Hash of a value's consensus serialization.
pub fn hashed<T: Encodable>(value: &T) -> Hash256 {
    sha256d(&encode(value))
}

pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
