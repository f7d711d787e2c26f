//! Signed transaction decoding and sender recovery for `txbytes`
//!
//! Supported envelopes:
//! - legacy RLP list, with or without EIP-155 replay protection
//! - `0x01` access list transactions (EIP-2930)
//! - `0x02` dynamic fee transactions (EIP-1559)

use bach_crypto::{keccak256, recover_address, Address, Signature, H256, U256};
use bach_evm::{Fork, Rules};
use rlp::{Rlp, RlpStream};

const ACCESS_LIST_TX_TYPE: u8 = 0x01;
const DYNAMIC_FEE_TX_TYPE: u8 = 0x02;

/// secp256k1 group order divided by two (EIP-2 low-s bound)
const SECP256K1N_HALF: U256 = U256([
    0xdfe9_2f46_681b_20a0,
    0x5d57_6e73_57a4_501d,
    0xffff_ffff_ffff_ffff,
    0x7fff_ffff_ffff_ffff,
]);

/// Decoded envelope with its recovered sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    /// Envelope type; 0 for legacy
    pub tx_type: u8,
    /// Chain id, if the signature commits to one
    pub chain_id: Option<u64>,
    /// Sender nonce
    pub nonce: u64,
    /// Gas limit
    pub gas_limit: u64,
    /// Recipient; `None` for creation
    pub to: Option<Address>,
    /// Transferred value
    pub value: U256,
    /// Call data
    pub data: Vec<u8>,
    /// Recovered sender
    pub sender: Address,
}

/// Field layout of one envelope type
struct Layout {
    tx_type: u8,
    /// Number of unsigned fields, signature follows
    fields: usize,
    nonce: usize,
    gas: usize,
    to: usize,
    value: usize,
    data: usize,
}

const LEGACY: Layout = Layout {
    tx_type: 0,
    fields: 6,
    nonce: 0,
    gas: 2,
    to: 3,
    value: 4,
    data: 5,
};

const ACCESS_LIST: Layout = Layout {
    tx_type: ACCESS_LIST_TX_TYPE,
    fields: 8,
    nonce: 1,
    gas: 3,
    to: 4,
    value: 5,
    data: 6,
};

const DYNAMIC_FEE: Layout = Layout {
    tx_type: DYNAMIC_FEE_TX_TYPE,
    fields: 9,
    nonce: 1,
    gas: 4,
    to: 5,
    value: 6,
    data: 7,
};

/// Decode `bytes` and recover its sender under the signer of `rules`
pub fn recover_sender(bytes: &[u8], rules: &Rules) -> Result<SignedTx, String> {
    let first = *bytes.first().ok_or("empty transaction bytes")?;
    if first >= 0xc0 {
        return decode_legacy(bytes, rules);
    }
    let (layout, fork) = match first {
        ACCESS_LIST_TX_TYPE => (&ACCESS_LIST, Fork::Berlin),
        DYNAMIC_FEE_TX_TYPE => (&DYNAMIC_FEE, Fork::London),
        other => return Err(format!("transaction type {other:#04x} not supported")),
    };
    if rules.fork < fork {
        return Err("transaction type not supported".to_string());
    }
    decode_typed(&bytes[1..], layout, rules)
}

fn rlp_err(e: rlp::DecoderError) -> String {
    format!("rlp: {e}")
}

fn check_shape(rlp: &Rlp<'_>, layout: &Layout) -> Result<(), String> {
    if !rlp.is_list() {
        return Err("rlp: expected input list".to_string());
    }
    let count = rlp.item_count().map_err(rlp_err)?;
    if count != layout.fields + 3 {
        return Err(format!(
            "rlp: expected {} fields, got {count}",
            layout.fields + 3
        ));
    }
    Ok(())
}

fn decode_legacy(bytes: &[u8], rules: &Rules) -> Result<SignedTx, String> {
    let rlp = Rlp::new(bytes);
    check_shape(&rlp, &LEGACY)?;

    let v: U256 = rlp.val_at(LEGACY.fields).map_err(rlp_err)?;
    let (chain_id, y_parity) = if v == U256::from(27) || v == U256::from(28) {
        (None, (v.low_u64() - 27) as u8)
    } else if v >= U256::from(35) {
        if !rules.is_eip158() {
            return Err("transaction protected by EIP-155 before its activation".to_string());
        }
        let v = v.low_u64();
        (Some((v - 35) / 2), ((v - 35) % 2) as u8)
    } else {
        return Err("invalid transaction v, r, s values".to_string());
    };

    let mut unsigned = RlpStream::new_list(LEGACY.fields + if chain_id.is_some() { 3 } else { 0 });
    for i in 0..LEGACY.fields {
        unsigned.append_raw(rlp.at(i).map_err(rlp_err)?.as_raw(), 1);
    }
    if let Some(id) = chain_id {
        unsigned.append(&id);
        unsigned.append_empty_data();
        unsigned.append_empty_data();
    }
    let hash = keccak256(&unsigned.out());
    finish(&rlp, &LEGACY, chain_id, y_parity, hash, rules)
}

fn decode_typed(payload: &[u8], layout: &Layout, rules: &Rules) -> Result<SignedTx, String> {
    let rlp = Rlp::new(payload);
    check_shape(&rlp, layout)?;

    let chain_id: u64 = rlp.val_at(0).map_err(rlp_err)?;
    let y_parity: u64 = rlp.val_at(layout.fields).map_err(rlp_err)?;
    if y_parity > 1 {
        return Err("invalid transaction v, r, s values".to_string());
    }

    let mut unsigned = RlpStream::new_list(layout.fields);
    for i in 0..layout.fields {
        unsigned.append_raw(rlp.at(i).map_err(rlp_err)?.as_raw(), 1);
    }
    let mut preimage = vec![layout.tx_type];
    preimage.extend_from_slice(&unsigned.out());
    let hash = keccak256(&preimage);
    finish(&rlp, layout, Some(chain_id), y_parity as u8, hash, rules)
}

fn finish(
    rlp: &Rlp<'_>,
    layout: &Layout,
    chain_id: Option<u64>,
    y_parity: u8,
    hash: H256,
    rules: &Rules,
) -> Result<SignedTx, String> {
    if let Some(id) = chain_id {
        if id != rules.chain_id {
            return Err(format!(
                "invalid chain id for signer: have {id} want {}",
                rules.chain_id
            ));
        }
    }

    let r: U256 = rlp.val_at(layout.fields + 1).map_err(rlp_err)?;
    let s: U256 = rlp.val_at(layout.fields + 2).map_err(rlp_err)?;
    if r.is_zero() || s.is_zero() || (rules.is_homestead() && s > SECP256K1N_HALF) {
        return Err("invalid transaction v, r, s values".to_string());
    }
    let signature = Signature::new(be_bytes(r), be_bytes(s), y_parity);
    let sender = recover_address(&hash, &signature).map_err(|e| e.to_string())?;

    let to_raw = rlp.at(layout.to).map_err(rlp_err)?;
    let to = if to_raw.is_empty() {
        None
    } else {
        let bytes = to_raw.data().map_err(rlp_err)?;
        if bytes.len() != 20 {
            return Err(format!("rlp: invalid recipient length {}", bytes.len()));
        }
        Some(Address::from_slice(bytes))
    };

    Ok(SignedTx {
        tx_type: layout.tx_type,
        chain_id,
        nonce: rlp.val_at(layout.nonce).map_err(rlp_err)?,
        gas_limit: rlp.val_at(layout.gas).map_err(rlp_err)?,
        to,
        value: rlp.val_at(layout.value).map_err(rlp_err)?,
        data: rlp.val_at(layout.data).map_err(rlp_err)?,
        sender,
    })
}

fn be_bytes(value: U256) -> [u8; 32] {
    let mut out = [0u8; 32];
    value.to_big_endian(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bach_crypto::{secret_to_address, sign, PrivateKey};
    use bach_evm::ChainConfig;

    const SECRET: [u8; 32] = [0x45; 32];

    fn rules(fork: Fork) -> Rules {
        ChainConfig::new(fork).rules(&[])
    }

    fn sign_hash(hash: H256) -> Signature {
        let key = PrivateKey::from_slice(&SECRET).unwrap();
        sign(&hash, &key).unwrap()
    }

    fn append_fields(stream: &mut RlpStream, to: Address) {
        stream.append(&3u64); // nonce
        stream.append(&U256::from(10)); // gas price
        stream.append(&21_000u64);
        stream.append(&to);
        stream.append(&U256::from(7));
        stream.append(&vec![0xaau8, 0xbb]);
    }

    fn eip155_tx(chain_id: u64) -> Vec<u8> {
        let to = Address::repeat_byte(0x22);
        let mut unsigned = RlpStream::new_list(9);
        append_fields(&mut unsigned, to);
        unsigned.append(&chain_id);
        unsigned.append_empty_data();
        unsigned.append_empty_data();
        let sig = sign_hash(keccak256(&unsigned.out()));

        let mut signed = RlpStream::new_list(9);
        append_fields(&mut signed, to);
        signed.append(&(chain_id * 2 + 35 + u64::from(sig.y_parity)));
        signed.append(&U256::from_big_endian(&sig.r));
        signed.append(&U256::from_big_endian(&sig.s));
        signed.out().to_vec()
    }

    #[test]
    fn test_recover_eip155_sender() {
        let tx = recover_sender(&eip155_tx(1), &rules(Fork::London)).unwrap();
        assert_eq!(tx.sender, secret_to_address(&SECRET).unwrap());
        assert_eq!(tx.chain_id, Some(1));
        assert_eq!(tx.nonce, 3);
        assert_eq!(tx.gas_limit, 21_000);
        assert_eq!(tx.to, Some(Address::repeat_byte(0x22)));
        assert_eq!(tx.value, U256::from(7));
        assert_eq!(tx.data, vec![0xaa, 0xbb]);
    }

    #[test]
    fn test_wrong_chain_id_rejected() {
        let err = recover_sender(&eip155_tx(5), &rules(Fork::London)).unwrap_err();
        assert!(err.contains("invalid chain id"));
    }

    #[test]
    fn test_eip155_needs_spurious_dragon() {
        assert!(recover_sender(&eip155_tx(1), &rules(Fork::Homestead)).is_err());
    }

    #[test]
    fn test_dynamic_fee_tx() {
        let mut unsigned = RlpStream::new_list(9);
        unsigned.append(&1u64);
        unsigned.append(&0u64);
        unsigned.append(&U256::from(1));
        unsigned.append(&U256::from(20));
        unsigned.append(&50_000u64);
        unsigned.append_empty_data();
        unsigned.append(&U256::zero());
        unsigned.append(&vec![0x60u8, 0x00]);
        unsigned.begin_list(0);
        let unsigned = unsigned.out();

        let mut preimage = vec![DYNAMIC_FEE_TX_TYPE];
        preimage.extend_from_slice(&unsigned);
        let sig = sign_hash(keccak256(&preimage));

        let fields = Rlp::new(&unsigned);
        let mut signed = RlpStream::new_list(12);
        for i in 0..9 {
            signed.append_raw(fields.at(i).unwrap().as_raw(), 1);
        }
        signed.append(&u64::from(sig.y_parity));
        signed.append(&U256::from_big_endian(&sig.r));
        signed.append(&U256::from_big_endian(&sig.s));
        let mut bytes = vec![DYNAMIC_FEE_TX_TYPE];
        bytes.extend_from_slice(&signed.out());

        let tx = recover_sender(&bytes, &rules(Fork::London)).unwrap();
        assert_eq!(tx.tx_type, DYNAMIC_FEE_TX_TYPE);
        assert_eq!(tx.to, None);
        assert_eq!(tx.sender, secret_to_address(&SECRET).unwrap());

        assert_eq!(
            recover_sender(&bytes, &rules(Fork::Berlin)).unwrap_err(),
            "transaction type not supported"
        );
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(recover_sender(&[], &rules(Fork::London)).is_err());
        assert!(recover_sender(&[0x05, 0xc0], &rules(Fork::London)).is_err());
        assert!(recover_sender(&[0xc1, 0x80], &rules(Fork::London))
            .unwrap_err()
            .starts_with("rlp"));
    }
}
