//! The in-memory shape a [`crate::script::Script`] is replayed against.
//!
//! Rather than reinterpret raw bytes at C offsets (which would need
//! `unsafe` to get field values back out in Rust), each field is kept
//! as its own typed value and looked up by the offset its compiled
//! command addresses. `Block` entries may span several coalesced
//! source fields at once - exactly the range the script's `Block`
//! command for that run covers.

use crate::patch::Patch;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bytes(Vec<u8>),
    Str(String),
    InternedId(u32),
    PatchVal(Patch),
    BlockArray(Vec<Vec<u8>>),
    StringArray(Vec<String>),
    InternedArray(Vec<u32>),
    StructArray(Vec<Instance>),
    PatchArray(Vec<Patch>),
}

pub type Instance = HashMap<usize, FieldValue>;

/// Finds the `Bytes` entry whose span covers `[offset, offset+size)`
/// and returns that sub-slice. A condition's governing field may sit
/// inside a run the compiler coalesced with its neighbors, so a plain
/// key lookup at the field's own offset isn't enough.
pub fn read_bytes_range(instance: &Instance, offset: usize, size: usize) -> Option<&[u8]> {
    for (start, value) in instance {
        if let FieldValue::Bytes(bytes) = value {
            if *start <= offset && offset + size <= start + bytes.len() {
                return Some(&bytes[offset - start..offset - start + size]);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_lookup_finds_a_slice_inside_a_coalesced_block() {
        let mut instance = Instance::new();
        instance.insert(0, FieldValue::Bytes(vec![1, 2, 3, 4, 5, 6, 7, 8]));
        assert_eq!(read_bytes_range(&instance, 4, 4), Some(&[5u8, 6, 7, 8][..]));
    }

    #[test]
    fn range_lookup_misses_when_nothing_covers_the_span() {
        let instance = Instance::new();
        assert_eq!(read_bytes_range(&instance, 0, 4), None);
    }
}
