//! Interned strings (§4.3.4) and the reflection lookup tables patch
//! serialization uses to find them inside opaque byte chunks (§4.3.5).
//!
//! Two tables exist for different reasons and must not be confused:
//! [`InternedStringPool`] is the process-local interning table that
//! turns the `u32` handle stored in an instance's bytes into an actual
//! string (and back); it always exists. [`InternedStringRegistry`] is
//! the *optional* wire-side compaction table from §4.3.4 - when one is
//! attached, a pool id serializes as a registry index instead of an
//! inline string.

use crate::wire::{read_string, read_u32, write_string, write_u32};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::Mutex;

/// Sentinel pool id / registry index standing in for a null interned
/// string. Chosen so it never collides with a real index, which always
/// starts at 0 and grows densely.
pub const NULL_ID: u32 = u32::MAX;

#[derive(Default)]
struct PoolState {
    values: Vec<String>,
    index: HashMap<String, u32>,
}

/// Always-available process-local string interning table. Field bytes
/// for an `InternedString` command are, in this engine's instance
/// representation, a little-endian `u32` id into this pool.
pub struct InternedStringPool {
    state: Mutex<PoolState>,
}

impl Default for InternedStringPool {
    fn default() -> Self {
        InternedStringPool { state: Mutex::new(PoolState::default()) }
    }
}

impl InternedStringPool {
    pub fn new() -> Self {
        InternedStringPool::default()
    }

    pub fn intern(&self, value: &str) -> u32 {
        let mut state = self.state.lock().expect("interned string pool lock poisoned");
        if let Some(id) = state.index.get(value) {
            return *id;
        }
        let id = state.values.len() as u32;
        state.values.push(value.to_string());
        state.index.insert(value.to_string(), id);
        id
    }

    pub fn resolve(&self, id: u32) -> Option<String> {
        if id == NULL_ID {
            return None;
        }
        let state = self.state.lock().expect("interned string pool lock poisoned");
        state.values.get(id as usize).cloned()
    }
}

struct LoadStoreTable {
    values: Vec<String>,
    index: HashMap<String, u32>,
}

/// The optional wire-side compaction table (§4.3.4, §5). Load-only
/// mode needs no lock since it never mutates after construction;
/// load-store mode locks only the store path.
pub enum InternedStringRegistry {
    LoadOnly(Vec<String>),
    LoadStore(Mutex<LoadStoreTable>),
}

impl InternedStringRegistry {
    pub fn load_only(values: Vec<String>) -> Self {
        InternedStringRegistry::LoadOnly(values)
    }

    pub fn load_store() -> Self {
        InternedStringRegistry::LoadStore(Mutex::new(LoadStoreTable { values: Vec::new(), index: HashMap::new() }))
    }

    pub fn resolve(&self, idx: u32) -> Option<String> {
        match self {
            InternedStringRegistry::LoadOnly(values) => values.get(idx as usize).cloned(),
            InternedStringRegistry::LoadStore(table) => {
                let table = table.lock().expect("interned string registry lock poisoned");
                table.values.get(idx as usize).cloned()
            }
        }
    }

    /// Looks up or assigns a wire index for `value`. Load-only mode
    /// cannot register new strings, matching "index->value only" (§3.3).
    pub fn intern(&self, value: &str) -> Option<u32> {
        match self {
            InternedStringRegistry::LoadOnly(values) => values.iter().position(|v| v == value).map(|i| i as u32),
            InternedStringRegistry::LoadStore(table) => {
                let mut table = table.lock().expect("interned string registry lock poisoned");
                if let Some(idx) = table.index.get(value) {
                    return Some(*idx);
                }
                let idx = table.values.len() as u32;
                table.values.push(value.to_string());
                table.index.insert(value.to_string(), idx);
                Some(idx)
            }
        }
    }

    /// `u32 total_count; { u32 length; byte[length] }*` (§6.4).
    pub fn write_table<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let values: Vec<String> = match self {
            InternedStringRegistry::LoadOnly(values) => values.clone(),
            InternedStringRegistry::LoadStore(table) => table.lock().expect("lock poisoned").values.clone(),
        };
        write_u32(out, values.len() as u32)?;
        for value in &values {
            write_string(out, value)?;
        }
        Ok(())
    }

    /// Streams strings one-by-one into a fresh load-store table.
    pub fn read_table<R: Read>(input: &mut R) -> io::Result<Self> {
        let count = read_u32(input)?;
        let registry = InternedStringRegistry::load_store();
        for _ in 0..count {
            let value = read_string(input)?;
            registry.intern(&value);
        }
        Ok(registry)
    }
}

/// Serializes a pool id through the interned-string channel: as a
/// registry index when `registry` is attached, otherwise inline.
pub fn write_interned<W: Write>(
    out: &mut W,
    id: u32,
    registry: Option<&InternedStringRegistry>,
    pool: &InternedStringPool,
) -> io::Result<()> {
    match registry {
        Some(registry) => {
            if id == NULL_ID {
                write_u32(out, NULL_ID)
            } else {
                let value = pool.resolve(id).ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "dangling interned string id"))?;
                let idx = registry
                    .intern(&value)
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "value not present in load-only registry"))?;
                write_u32(out, idx)
            }
        }
        None => {
            if id == NULL_ID {
                write_string(out, "")
            } else {
                let value = pool.resolve(id).ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "dangling interned string id"))?;
                write_string(out, &value)
            }
        }
    }
}

/// Decodes through the interned-string channel and interns the result
/// into `pool`, returning its pool id (or `NULL_ID`).
pub fn read_interned<R: Read>(
    input: &mut R,
    registry: Option<&InternedStringRegistry>,
    pool: &InternedStringPool,
) -> io::Result<u32> {
    match registry {
        Some(registry) => {
            let idx = read_u32(input)?;
            if idx == NULL_ID {
                Ok(NULL_ID)
            } else {
                let value = registry
                    .resolve(idx)
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unknown registry index"))?;
                Ok(pool.intern(&value))
            }
        }
        None => {
            let value = read_string(input)?;
            if value.is_empty() {
                Ok(NULL_ID)
            } else {
                Ok(pool.intern(&value))
            }
        }
    }
}

/// Sorted, deduplicated offsets (relative to a type's own origin) at
/// which an `InternedString` slot appears anywhere reachable through
/// plain struct nesting (§3.3). Patch chunk serialization uses this to
/// pick interned-string slots out of otherwise-opaque byte spans.
#[derive(Debug, Clone, Default)]
pub struct InternedStringLookup {
    slot_offsets: Vec<usize>,
}

impl InternedStringLookup {
    pub fn new(mut slot_offsets: Vec<usize>) -> Self {
        slot_offsets.sort_unstable();
        slot_offsets.dedup();
        InternedStringLookup { slot_offsets }
    }

    pub fn contains(&self, absolute_offset: usize) -> bool {
        self.slot_offsets.binary_search(&absolute_offset).is_ok()
    }

    /// Builds the lookup for a type by walking its fields (and, for
    /// nested struct fields, recursing with a rebased origin). Does not
    /// descend into dynamic arrays or patches - interned strings inside
    /// those are handled by their own element scripts, not folded into
    /// this type's chunk lookup.
    pub fn for_struct(descriptor: &crate::reflect::StructDescriptor, registry: &dyn crate::reflect::TypeRegistry) -> Self {
        let mut offsets = Vec::new();
        collect(descriptor, 0, registry, &mut offsets);
        InternedStringLookup::new(offsets)
    }
}

fn collect(descriptor: &crate::reflect::StructDescriptor, base_offset: usize, registry: &dyn crate::reflect::TypeRegistry, out: &mut Vec<usize>) {
    use crate::reflect::FieldArchetype;
    for field in &descriptor.fields {
        let abs = base_offset + field.offset;
        match &field.archetype {
            FieldArchetype::InternedString => out.push(abs),
            FieldArchetype::Struct(type_name) => {
                if let Some(child) = registry.lookup(type_name) {
                    collect(child, abs, registry, out);
                }
            }
            _ => {}
        }
    }
}
