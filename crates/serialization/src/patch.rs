//! Patch serialization (§3.3, §4.3.5, §6.4).

use crate::interned::{read_interned, write_interned, InternedStringLookup, InternedStringPool, InternedStringRegistry};
use crate::reflect::{FieldArchetype, TypeRegistry};
use crate::wire::{read_string, read_u32, write_string, write_u32};
use std::collections::HashMap;
use std::io::{self, Read, Write};

/// Distinguished type name a patch serializes under when it targets no
/// real reflected type.
pub const INVALID_PATCH_TYPE: &str = "<invalid>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchNode {
    Chunk { offset: u32, size: u32, bytes: Vec<u8> },
    SectionOpen { parent_id: u32, my_id: u32, section_type: u32, source_offset: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub target_type: String,
    pub section_id_bound: u32,
    pub nodes: Vec<PatchNode>,
}

impl Patch {
    pub fn invalid() -> Self {
        Patch { target_type: INVALID_PATCH_TYPE.to_string(), section_id_bound: 0, nodes: Vec::new() }
    }
}

/// External interface the reader drives while rebuilding a patch from
/// the wire (§3.3: "an external object we only consume").
pub trait PatchBuilder {
    fn chunk(&mut self, section_handle: u32, offset: u32, size: u32, bytes: &[u8]);
    fn section(&mut self, parent_handle: u32, my_handle: u32, section_type: u32, offset_in_parent: u32);
}

/// What a section's `Chunk` bytes actually hold, re-derived per section
/// rather than fixed once for the whole patch (§4.3.5): a section
/// opened against a `StructDynamicArray` field targets that field's
/// element struct, a section against an `InternedStringDynamicArray`
/// field is a bare sequence of interned strings, and anything else
/// (scalar arrays, an unresolvable parent) is raw bytes.
#[derive(Debug, Clone)]
enum SectionTarget {
    Struct(String),
    InternedStringArray,
    Opaque,
}

/// Tracks, for every section id seen so far in this patch, what it
/// targets - resolved from its parent's target plus the field at
/// `offset_in_parent`, the way the chunk reader/writer needs it handed
/// to them section by section instead of once for the root type.
struct SectionTracker<'a> {
    registry: &'a dyn TypeRegistry,
    targets: HashMap<u32, SectionTarget>,
}

impl<'a> SectionTracker<'a> {
    fn new(root_type: &str, registry: &'a dyn TypeRegistry) -> Self {
        let mut targets = HashMap::new();
        targets.insert(0, SectionTarget::Struct(root_type.to_string()));
        SectionTracker { registry, targets }
    }

    fn open(&mut self, parent_id: u32, my_id: u32, offset_in_parent: u32) {
        let parent = self.targets.get(&parent_id).cloned().unwrap_or(SectionTarget::Opaque);
        let child = self.resolve_child(&parent, offset_in_parent);
        self.targets.insert(my_id, child);
    }

    fn resolve_child(&self, parent: &SectionTarget, offset_in_parent: u32) -> SectionTarget {
        let SectionTarget::Struct(parent_type) = parent else { return SectionTarget::Opaque };
        let Some(descriptor) = self.registry.lookup(parent_type) else { return SectionTarget::Opaque };
        let local_offset = if descriptor.size == 0 { offset_in_parent as usize } else { offset_in_parent as usize % descriptor.size };
        let Some(field) = descriptor.fields.iter().find(|f| f.offset == local_offset) else { return SectionTarget::Opaque };
        match &field.archetype {
            FieldArchetype::StructDynamicArray(element_type) => SectionTarget::Struct(element_type.clone()),
            FieldArchetype::InternedStringDynamicArray => SectionTarget::InternedStringArray,
            _ => SectionTarget::Opaque,
        }
    }

    /// The lookup for `section_id`'s target struct plus that struct's
    /// size, which chunk offsets are taken modulo so a repeated-element
    /// array section's offsets keep landing inside one element.
    fn lookup_for(&self, section_id: u32) -> Option<(InternedStringLookup, usize)> {
        match self.targets.get(&section_id) {
            Some(SectionTarget::Struct(type_name)) => self
                .registry
                .lookup(type_name)
                .map(|descriptor| (InternedStringLookup::for_struct(descriptor, self.registry), descriptor.size)),
            _ => None,
        }
    }

    fn is_interned_string_array(&self, section_id: u32) -> bool {
        matches!(self.targets.get(&section_id), Some(SectionTarget::InternedStringArray))
    }
}

pub fn write_patch<W: Write>(
    out: &mut W,
    patch: &Patch,
    registry: Option<&dyn TypeRegistry>,
    interned_registry: Option<&InternedStringRegistry>,
    pool: &InternedStringPool,
) -> io::Result<()> {
    write_string(out, &patch.target_type)?;
    write_u32(out, patch.nodes.len() as u32)?;
    write_u32(out, patch.section_id_bound)?;
    let mut tracker = registry.map(|registry| SectionTracker::new(&patch.target_type, registry));
    let mut current_section = 0u32;
    for node in &patch.nodes {
        match node {
            PatchNode::Chunk { offset, size, bytes } => {
                out.write_all(&[1u8])?;
                write_u32(out, *offset)?;
                write_u32(out, *size)?;
                let mode = chunk_mode(tracker.as_ref(), current_section);
                write_chunk_bytes(out, *offset, bytes, mode, interned_registry, pool)?;
            }
            PatchNode::SectionOpen { parent_id, my_id, section_type, source_offset } => {
                out.write_all(&[0u8])?;
                write_u32(out, *parent_id)?;
                write_u32(out, *my_id)?;
                write_u32(out, *section_type)?;
                write_u32(out, *source_offset)?;
                if let Some(tracker) = tracker.as_mut() {
                    tracker.open(*parent_id, *my_id, *source_offset);
                }
                current_section = *my_id;
            }
        }
    }
    Ok(())
}

pub fn read_patch<R: Read>(
    input: &mut R,
    registry: Option<&dyn TypeRegistry>,
    interned_registry: Option<&InternedStringRegistry>,
    pool: &InternedStringPool,
    builder: &mut dyn PatchBuilder,
) -> io::Result<Patch> {
    let target_type = read_string(input)?;
    let chunk_count = read_u32(input)?;
    let section_id_bound = read_u32(input)?;
    let mut nodes = Vec::with_capacity(chunk_count as usize);
    let mut tracker = registry.map(|registry| SectionTracker::new(&target_type, registry));
    let mut current_section = 0u32;
    for _ in 0..chunk_count {
        let mut tag = [0u8; 1];
        input.read_exact(&mut tag)?;
        if tag[0] == 1 {
            let offset = read_u32(input)?;
            let size = read_u32(input)?;
            let mode = chunk_mode(tracker.as_ref(), current_section);
            let bytes = read_chunk_bytes(input, offset, size, mode, interned_registry, pool)?;
            builder.chunk(current_section, offset, size, &bytes);
            nodes.push(PatchNode::Chunk { offset, size, bytes });
        } else {
            let parent_id = read_u32(input)?;
            let my_id = read_u32(input)?;
            let section_type = read_u32(input)?;
            let source_offset = read_u32(input)?;
            if my_id >= section_id_bound {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "section id exceeds declared bound"));
            }
            builder.section(parent_id, my_id, section_type, source_offset);
            if let Some(tracker) = tracker.as_mut() {
                tracker.open(parent_id, my_id, source_offset);
            }
            current_section = my_id;
            nodes.push(PatchNode::SectionOpen { parent_id, my_id, section_type, source_offset });
        }
    }
    Ok(Patch { target_type, section_id_bound, nodes })
}

/// How to treat the bytes of a `Chunk` opened under `section_id`,
/// decided fresh each time from the tracker rather than once per patch.
enum ChunkMode {
    Raw,
    Struct(InternedStringLookup, usize),
    InternedStringArray,
}

fn chunk_mode(tracker: Option<&SectionTracker<'_>>, section_id: u32) -> ChunkMode {
    let Some(tracker) = tracker else { return ChunkMode::Raw };
    if tracker.is_interned_string_array(section_id) {
        return ChunkMode::InternedStringArray;
    }
    match tracker.lookup_for(section_id) {
        Some((lookup, size)) => ChunkMode::Struct(lookup, size),
        None => ChunkMode::Raw,
    }
}

/// A repeated-element array section's chunk offsets run continuously
/// across elements; this folds one back into the single element's own
/// byte range so it lines up with the element type's lookup offsets.
fn local_offset(absolute: usize, struct_size: usize) -> usize {
    if struct_size == 0 {
        absolute
    } else {
        absolute % struct_size
    }
}

fn write_chunk_bytes<W: Write>(
    out: &mut W,
    chunk_offset: u32,
    bytes: &[u8],
    mode: ChunkMode,
    registry: Option<&InternedStringRegistry>,
    pool: &InternedStringPool,
) -> io::Result<()> {
    let (lookup, struct_size) = match mode {
        ChunkMode::Raw => return out.write_all(bytes),
        ChunkMode::InternedStringArray => {
            let mut i = 0usize;
            while i + 4 <= bytes.len() {
                let id = u32::from_le_bytes(bytes[i..i + 4].try_into().unwrap());
                write_interned(out, id, registry, pool)?;
                i += 4;
            }
            return out.write_all(&bytes[i..]);
        }
        ChunkMode::Struct(lookup, struct_size) => (lookup, struct_size),
    };
    let mut i = 0usize;
    let mut raw_start = 0usize;
    while i < bytes.len() {
        let absolute = local_offset(chunk_offset as usize + i, struct_size);
        if i + 4 <= bytes.len() && lookup.contains(absolute) {
            if raw_start < i {
                out.write_all(&bytes[raw_start..i])?;
            }
            let id = u32::from_le_bytes(bytes[i..i + 4].try_into().unwrap());
            write_interned(out, id, registry, pool)?;
            i += 4;
            raw_start = i;
        } else {
            i += 1;
        }
    }
    if raw_start < bytes.len() {
        out.write_all(&bytes[raw_start..])?;
    }
    Ok(())
}

fn read_chunk_bytes<R: Read>(
    input: &mut R,
    chunk_offset: u32,
    size: u32,
    mode: ChunkMode,
    registry: Option<&InternedStringRegistry>,
    pool: &InternedStringPool,
) -> io::Result<Vec<u8>> {
    let (lookup, struct_size) = match mode {
        ChunkMode::Raw => {
            let mut buf = vec![0u8; size as usize];
            input.read_exact(&mut buf)?;
            return Ok(buf);
        }
        ChunkMode::InternedStringArray => {
            let mut out = vec![0u8; size as usize];
            let mut i = 0usize;
            while i + 4 <= size as usize {
                let id = read_interned(input, registry, pool)?;
                out[i..i + 4].copy_from_slice(&id.to_le_bytes());
                i += 4;
            }
            if i < size as usize {
                input.read_exact(&mut out[i..])?;
            }
            return Ok(out);
        }
        ChunkMode::Struct(lookup, struct_size) => (lookup, struct_size),
    };
    let mut out = vec![0u8; size as usize];
    let mut i = 0usize;
    while i < size as usize {
        let absolute = local_offset(chunk_offset as usize + i, struct_size);
        if i + 4 <= size as usize && lookup.contains(absolute) {
            let id = read_interned(input, registry, pool)?;
            out[i..i + 4].copy_from_slice(&id.to_le_bytes());
            i += 4;
        } else {
            let mut b = [0u8; 1];
            input.read_exact(&mut b)?;
            out[i] = b[0];
            i += 1;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::{FieldArchetype, FieldDescriptor, StaticTypeRegistry, StructDescriptor};
    use std::io::Cursor;

    #[derive(Default)]
    struct RecordingBuilder {
        chunks: Vec<(u32, u32, u32, Vec<u8>)>,
        sections: Vec<(u32, u32, u32, u32)>,
    }

    impl PatchBuilder for RecordingBuilder {
        fn chunk(&mut self, section_handle: u32, offset: u32, size: u32, bytes: &[u8]) {
            self.chunks.push((section_handle, offset, size, bytes.to_vec()));
        }
        fn section(&mut self, parent_handle: u32, my_handle: u32, section_type: u32, offset_in_parent: u32) {
            self.sections.push((parent_handle, my_handle, section_type, offset_in_parent));
        }
    }

    fn field(name: &str, offset: usize, size: usize, archetype: FieldArchetype) -> FieldDescriptor {
        FieldDescriptor {
            name: name.to_string(),
            offset,
            size,
            archetype,
            visibility_condition_field: None,
            visibility_condition_values: Vec::new(),
        }
    }

    #[test]
    fn plain_chunk_round_trips_without_a_registry() {
        let patch = Patch {
            target_type: "Widget".to_string(),
            section_id_bound: 0,
            nodes: vec![PatchNode::Chunk { offset: 0, size: 4, bytes: vec![1, 2, 3, 4] }],
        };
        let pool = InternedStringPool::new();
        let mut buf = Vec::new();
        write_patch(&mut buf, &patch, None, None, &pool).unwrap();

        let mut builder = RecordingBuilder::default();
        let restored = read_patch(&mut Cursor::new(buf), None, None, &pool, &mut builder).unwrap();
        assert_eq!(restored, patch);
        assert_eq!(builder.chunks, vec![(0, 0, 4, vec![1, 2, 3, 4])]);
    }

    #[test]
    fn chunk_with_an_embedded_interned_slot_serializes_it_through_the_interned_channel() {
        let pool = InternedStringPool::new();
        let id = pool.intern("hello");
        let mut bytes = vec![0u8; 12];
        bytes[0..4].copy_from_slice(&1i32.to_le_bytes());
        bytes[4..8].copy_from_slice(&id.to_le_bytes());
        bytes[8..12].copy_from_slice(&2i32.to_le_bytes());

        let mut registry = StaticTypeRegistry::new();
        registry.insert(StructDescriptor {
            name: "Widget".to_string(),
            size: 12,
            fields: vec![
                field("a", 0, 4, FieldArchetype::Block),
                field("s", 4, 4, FieldArchetype::InternedString),
                field("b", 8, 4, FieldArchetype::Block),
            ],
        });
        let patch = Patch {
            target_type: "Widget".to_string(),
            section_id_bound: 0,
            nodes: vec![PatchNode::Chunk { offset: 0, size: 12, bytes: bytes.clone() }],
        };
        let mut buf = Vec::new();
        write_patch(&mut buf, &patch, Some(&registry), None, &pool).unwrap();
        // The middle 4 bytes are no longer a raw pool id - they became a
        // length-prefixed inline string, so the wire is longer than 12 bytes.
        assert!(buf.len() > bytes.len());

        let mut builder = RecordingBuilder::default();
        let fresh_pool = InternedStringPool::new();
        let restored = read_patch(&mut Cursor::new(buf), Some(&registry), None, &fresh_pool, &mut builder).unwrap();
        let PatchNode::Chunk { bytes: restored_bytes, .. } = &restored.nodes[0] else { unreachable!() };
        assert_eq!(&restored_bytes[0..4], &bytes[0..4]);
        assert_eq!(&restored_bytes[8..12], &bytes[8..12]);
        let restored_id = u32::from_le_bytes(restored_bytes[4..8].try_into().unwrap());
        assert_eq!(fresh_pool.resolve(restored_id).as_deref(), Some("hello"));
    }

    /// A nested section targeting a struct whose interned-string slot
    /// sits at a different offset than the root type's own slot: if the
    /// root's lookup leaked into the section (or vice versa) this would
    /// either miss the embedded string or corrupt the raw bytes next to it.
    #[test]
    fn nested_section_uses_its_own_targets_lookup_not_the_roots() {
        let mut registry = StaticTypeRegistry::new();
        registry.insert(StructDescriptor {
            name: "Container".to_string(),
            size: 8,
            fields: vec![
                field("label", 0, 4, FieldArchetype::InternedString),
                field("items", 4, 4, FieldArchetype::StructDynamicArray("Item".to_string())),
            ],
        });
        registry.insert(StructDescriptor {
            name: "Item".to_string(),
            size: 8,
            fields: vec![field("id", 0, 4, FieldArchetype::Block), field("name", 4, 4, FieldArchetype::InternedString)],
        });

        let pool = InternedStringPool::new();
        let label_id = pool.intern("root-label");
        let name_id = pool.intern("item-name");

        let mut root_bytes = vec![0u8; 4];
        root_bytes[0..4].copy_from_slice(&label_id.to_le_bytes());

        let mut item_bytes = vec![0u8; 8];
        item_bytes[0..4].copy_from_slice(&7i32.to_le_bytes());
        item_bytes[4..8].copy_from_slice(&name_id.to_le_bytes());

        let patch = Patch {
            target_type: "Container".to_string(),
            section_id_bound: 2,
            nodes: vec![
                PatchNode::Chunk { offset: 0, size: 4, bytes: root_bytes.clone() },
                PatchNode::SectionOpen { parent_id: 0, my_id: 1, section_type: 0, source_offset: 4 },
                PatchNode::Chunk { offset: 0, size: 8, bytes: item_bytes.clone() },
            ],
        };

        let mut buf = Vec::new();
        write_patch(&mut buf, &patch, Some(&registry), None, &pool).unwrap();

        let mut builder = RecordingBuilder::default();
        let fresh_pool = InternedStringPool::new();
        let restored = read_patch(&mut Cursor::new(buf), Some(&registry), None, &fresh_pool, &mut builder).unwrap();

        let PatchNode::Chunk { bytes: root_restored, .. } = &restored.nodes[0] else { unreachable!() };
        assert_eq!(root_restored, &root_bytes);
        let root_id = u32::from_le_bytes(root_restored[0..4].try_into().unwrap());
        assert_eq!(fresh_pool.resolve(root_id).as_deref(), Some("root-label"));

        let PatchNode::Chunk { bytes: item_restored, .. } = &restored.nodes[2] else { unreachable!() };
        assert_eq!(&item_restored[0..4], &item_bytes[0..4]);
        let item_name_id = u32::from_le_bytes(item_restored[4..8].try_into().unwrap());
        assert_eq!(fresh_pool.resolve(item_name_id).as_deref(), Some("item-name"));
    }

    #[test]
    fn invalid_type_patch_has_no_chunks() {
        let patch = Patch::invalid();
        let pool = InternedStringPool::new();
        let mut buf = Vec::new();
        write_patch(&mut buf, &patch, None, None, &pool).unwrap();
        let mut builder = RecordingBuilder::default();
        let restored = read_patch(&mut Cursor::new(buf), None, None, &pool, &mut builder).unwrap();
        assert_eq!(restored.target_type, INVALID_PATCH_TYPE);
        assert!(restored.nodes.is_empty());
    }

    #[test]
    fn section_id_at_or_past_the_bound_is_rejected() {
        let mut buf = Vec::new();
        write_string(&mut buf, "Widget").unwrap();
        write_u32(&mut buf, 1).unwrap();
        write_u32(&mut buf, 1).unwrap(); // section_id_bound
        buf.push(0); // section open tag
        write_u32(&mut buf, 0).unwrap(); // parent_id
        write_u32(&mut buf, 1).unwrap(); // my_id == bound, out of range
        write_u32(&mut buf, 0).unwrap();
        write_u32(&mut buf, 0).unwrap();

        let pool = InternedStringPool::new();
        let mut builder = RecordingBuilder::default();
        assert!(read_patch(&mut Cursor::new(buf), None, None, &pool, &mut builder).is_err());
    }
}
