//! Cluster slot hashing
//!
//! A key's slot is CRC16/XMODEM of its hash tag (the text between the first
//! `{` and the next `}`, when non-empty) or of the whole key, modulo 16384.

use crate::types::CLUSTER_SLOTS;
use crc16::{State, XMODEM};

/// Slot the store assigns to `key`.
pub fn key_slot(key: &str) -> u16 {
    let bytes = key.as_bytes();
    State::<XMODEM>::calculate(hash_tag(bytes).unwrap_or(bytes)) % CLUSTER_SLOTS
}

fn hash_tag(key: &[u8]) -> Option<&[u8]> {
    let open = key.iter().position(|&b| b == b'{')?;
    let rest = &key[open + 1..];
    let close = rest.iter().position(|&b| b == b'}')?;
    (close > 0).then(|| &rest[..close])
}

/// Replace every `{...}` region of `name` with `{tag}`, or prefix `{tag}` when
/// the name has none.
pub fn with_hash_tag(name: &str, tag: &str) -> String {
    let mut tagged = String::with_capacity(name.len() + tag.len() + 2);
    let mut rest = name;
    let mut replaced = false;

    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        tagged.push_str(&rest[..open]);
        tagged.push('{');
        tagged.push_str(tag);
        tagged.push('}');
        rest = &rest[open + close + 1..];
        replaced = true;
    }

    if !replaced {
        return format!("{{{}}}{}", tag, name);
    }
    tagged.push_str(rest);
    tagged
}

/// Four hex digits identifying a queue name, used as the stem of its tags.
pub fn name_hash(name: &str) -> String {
    format!("{:04x}", State::<XMODEM>::calculate(name.as_bytes()))
}
