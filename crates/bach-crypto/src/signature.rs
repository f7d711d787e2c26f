//! secp256k1 signing, recovery and address derivation

use crate::{keccak256, Address, CryptoError};
use k256::ecdsa::{RecoveryId, Signature as K256Signature, SigningKey, VerifyingKey};
use primitive_types::H256;

/// Public key (65 bytes uncompressed, or 33 bytes compressed)
pub type PublicKey = VerifyingKey;

/// Private key (32 bytes)
pub type PrivateKey = SigningKey;

/// Recoverable ECDSA signature in Ethereum's (r, s, y-parity) form
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    /// r component
    pub r: [u8; 32],
    /// s component
    pub s: [u8; 32],
    /// y-parity of the ephemeral point, 0 or 1
    pub y_parity: u8,
}

impl Signature {
    /// Create signature from r, s and y-parity
    pub fn new(r: [u8; 32], s: [u8; 32], y_parity: u8) -> Self {
        Self { r, s, y_parity }
    }

    fn to_k256(&self) -> Result<K256Signature, CryptoError> {
        let r: k256::FieldBytes = self.r.into();
        let s: k256::FieldBytes = self.s.into();
        K256Signature::from_scalars(r, s).map_err(|e| CryptoError::InvalidSignature(e.to_string()))
    }
}

/// Sign a 32-byte prehash, normalizing to low-s (EIP-2)
pub fn sign(message_hash: &H256, private_key: &PrivateKey) -> Result<Signature, CryptoError> {
    let (mut signature, mut recovery_id) = private_key
        .sign_prehash_recoverable(message_hash.as_bytes())
        .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;

    if let Some(normalized) = signature.normalize_s() {
        signature = normalized;
        recovery_id = RecoveryId::from_byte(recovery_id.to_byte() ^ 1)
            .ok_or(CryptoError::InvalidRecoveryId(u64::from(recovery_id.to_byte() ^ 1)))?;
    }

    Ok(Signature {
        r: signature.r().to_bytes().into(),
        s: signature.s().to_bytes().into(),
        y_parity: recovery_id.to_byte(),
    })
}

/// Recover the signer address of a prehash
pub fn recover_address(message_hash: &H256, signature: &Signature) -> Result<Address, CryptoError> {
    let recovery_id = RecoveryId::from_byte(signature.y_parity)
        .ok_or(CryptoError::InvalidRecoveryId(u64::from(signature.y_parity)))?;
    let public_key =
        VerifyingKey::recover_from_prehash(message_hash.as_bytes(), &signature.to_k256()?, recovery_id)
            .map_err(|e| CryptoError::RecoveryFailed(e.to_string()))?;
    Ok(public_key_to_address(&public_key))
}

/// Derive the address controlled by a raw 32-byte secret key
pub fn secret_to_address(secret: &[u8]) -> Result<Address, CryptoError> {
    let key = SigningKey::from_slice(secret).map_err(|_| CryptoError::InvalidPrivateKey)?;
    Ok(public_key_to_address(key.verifying_key()))
}

/// Derive Ethereum address from public key
pub fn public_key_to_address(public_key: &PublicKey) -> Address {
    // Uncompressed point is 0x04 || x || y; the address hashes x || y
    let encoded = public_key.to_encoded_point(false);
    let hash = keccak256(&encoded.as_bytes()[1..]);
    Address::from_slice(&hash.as_bytes()[12..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_sign_and_recover() {
        let private_key = SigningKey::random(&mut OsRng);
        let expected = public_key_to_address(private_key.verifying_key());

        let hash = keccak256(b"state test message");
        let signature = sign(&hash, &private_key).unwrap();

        assert!(signature.y_parity <= 1);
        assert_eq!(recover_address(&hash, &signature).unwrap(), expected);
    }

    #[test]
    fn test_known_secret_address() {
        // Sender of the ethereum/tests GeneralStateTests transactions
        let secret =
            hex::decode("45a915e4d060149eb4365960e6a7a45f334393093061116b197e3240065ff2d8").unwrap();
        let address = secret_to_address(&secret).unwrap();
        assert_eq!(
            hex::encode(address.as_bytes()),
            "a94f5374fce5edbc8e2a8697c15331677e6ebf0b"
        );
    }

    #[test]
    fn test_zero_secret_rejected() {
        assert_eq!(secret_to_address(&[0u8; 32]), Err(CryptoError::InvalidPrivateKey));
    }

    #[test]
    fn test_bad_recovery_id() {
        let signature = Signature::new([1u8; 32], [1u8; 32], 7);
        let hash = keccak256(b"x");
        assert_eq!(
            recover_address(&hash, &signature),
            Err(CryptoError::InvalidRecoveryId(7))
        );
    }
}
