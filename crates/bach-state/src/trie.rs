//! Merkle-Patricia trie root computation
//!
//! The trie is never materialized: nodes are encoded bottom-up from the
//! sorted key set and only the root hash is kept.

use bach_crypto::{keccak256, H256, EMPTY_ROOT_HASH};
use rlp::RlpStream;
use std::collections::BTreeMap;

type Entry = (Vec<u8>, Vec<u8>);

/// Root of a trie holding `entries` under their raw keys.
///
/// Later duplicates of a key replace earlier ones.
pub fn trie_root<I, K, V>(entries: I) -> H256
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    let items: BTreeMap<Vec<u8>, Vec<u8>> = entries
        .into_iter()
        .map(|(k, v)| (to_nibbles(k.as_ref()), v.as_ref().to_vec()))
        .collect();
    if items.is_empty() {
        return EMPTY_ROOT_HASH;
    }
    let items: Vec<Entry> = items.into_iter().collect();
    keccak256(&encode_node(&items, 0))
}

/// Root of a trie holding `entries` under keccak256 of their keys
pub fn secure_trie_root<I, K, V>(entries: I) -> H256
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    trie_root(
        entries
            .into_iter()
            .map(|(k, v)| (keccak256(k.as_ref()), v)),
    )
}

fn to_nibbles(key: &[u8]) -> Vec<u8> {
    key.iter().flat_map(|b| [b >> 4, b & 0x0f]).collect()
}

/// Compact (hex-prefix) encoding of a nibble path
fn hex_prefix(nibbles: &[u8], leaf: bool) -> Vec<u8> {
    let flag = if leaf { 2 } else { 0 };
    let mut out = Vec::with_capacity(nibbles.len() / 2 + 1);
    let rest = if nibbles.len() % 2 == 1 {
        out.push(((flag + 1) << 4) | nibbles[0]);
        &nibbles[1..]
    } else {
        out.push(flag << 4);
        nibbles
    };
    out.extend(rest.chunks(2).map(|pair| (pair[0] << 4) | pair[1]));
    out
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Child references are inlined when shorter than a hash
fn append_child(stream: &mut RlpStream, encoded: &[u8]) {
    if encoded.len() < 32 {
        stream.append_raw(encoded, 1);
    } else {
        stream.append(&keccak256(encoded));
    }
}

/// RLP encoding of the node covering `items`, all of which share the first
/// `depth` nibbles. `items` is sorted and free of duplicate keys.
fn encode_node(items: &[Entry], depth: usize) -> Vec<u8> {
    if let [(key, value)] = items {
        let mut stream = RlpStream::new_list(2);
        stream.append(&hex_prefix(&key[depth..], true));
        stream.append(value);
        return stream.out().to_vec();
    }

    let first = &items[0].0[depth..];
    let last = &items[items.len() - 1].0[depth..];
    let shared = common_prefix(first, last);
    if shared > 0 {
        let child = encode_node(items, depth + shared);
        let mut stream = RlpStream::new_list(2);
        stream.append(&hex_prefix(&first[..shared], false));
        append_child(&mut stream, &child);
        return stream.out().to_vec();
    }

    // A key ending here sorts before all longer keys
    let (value, rest) = if items[0].0.len() == depth {
        (Some(&items[0].1), &items[1..])
    } else {
        (None, items)
    };

    let mut stream = RlpStream::new_list(17);
    let mut start = 0;
    for nibble in 0..16u8 {
        let len = rest[start..]
            .iter()
            .take_while(|(key, _)| key[depth] == nibble)
            .count();
        if len == 0 {
            stream.append_empty_data();
        } else {
            append_child(&mut stream, &encode_node(&rest[start..start + len], depth + 1));
        }
        start += len;
    }
    match value {
        Some(value) => stream.append(value),
        None => stream.append_empty_data(),
    };
    stream.out().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex_root(entries: &[(&str, &str)]) -> String {
        hex::encode(trie_root(entries.iter().map(|(k, v)| (k.as_bytes(), v.as_bytes()))).as_bytes())
    }

    #[test]
    fn test_empty_trie() {
        let empty: [(&[u8], &[u8]); 0] = [];
        assert_eq!(trie_root(empty), EMPTY_ROOT_HASH);
    }

    #[test]
    fn test_branch_with_value() {
        let root = hex_root(&[
            ("doe", "reindeer"),
            ("dog", "puppy"),
            ("dogglesworth", "cat"),
        ]);
        assert_eq!(
            root,
            "8aad789dff2f538bca5d8ea56e8abe10f4c7ba3a5dea95fea4cd6e7c3a1168d3"
        );
    }

    #[test]
    fn test_insertion_order_irrelevant() {
        let forward = hex_root(&[("do", "verb"), ("horse", "stallion"), ("doge", "coin"), ("dog", "puppy")]);
        let backward = hex_root(&[("dog", "puppy"), ("doge", "coin"), ("horse", "stallion"), ("do", "verb")]);
        assert_eq!(forward, backward);
        assert_eq!(
            forward,
            "5991bb8c6514148a29db676a14ac506cd2cd5775ace63c30a4fe457715e9ac84"
        );
    }

    #[test]
    fn test_hex_prefix() {
        assert_eq!(hex_prefix(&[1, 2, 3], false), vec![0x11, 0x23]);
        assert_eq!(hex_prefix(&[0, 1, 2, 3], true), vec![0x20, 0x01, 0x23]);
        assert_eq!(hex_prefix(&[], true), vec![0x20]);
    }
}
