//! # bach-crypto
//!
//! Cryptographic primitives shared by the engine and the state-test harness.
//!
//! - Keccak-256 hashing and the well-known empty hashes
//! - ECDSA signing and public key recovery (secp256k1)
//! - Address derivation from secret and public keys

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod hash;
mod signature;

pub use error::CryptoError;
pub use hash::{keccak256, EMPTY_CODE_HASH, EMPTY_LIST_HASH, EMPTY_ROOT_HASH};
pub use signature::{
    public_key_to_address, recover_address, secret_to_address, sign, PrivateKey, PublicKey,
    Signature,
};

pub use primitive_types::{H160, H256, U256};

/// 20-byte account address
pub type Address = H160;
