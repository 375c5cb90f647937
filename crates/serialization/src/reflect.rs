//! The slice of the reflection data model the serialization engine
//! actually reads (§6.5). We consume these descriptors; nothing here
//! mutates them, and nothing outside a field's offset/size/archetype is
//! relied upon.

/// How to interpret the bytes at a field's offset. Pointer archetypes
/// that cannot appear in a serialized instance (plain external
/// pointers aside from the explicitly-marked `ExternalPointer` case)
/// are not represented here; the reflection preprocessor already
/// rejects them before a script is ever compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldArchetype {
    Block,
    String,
    InternedString,
    Patch,
    Struct(String),
    BlockDynamicArray,
    StringDynamicArray,
    InternedStringDynamicArray,
    StructDynamicArray(String),
    PatchDynamicArray,
    /// An inline array of scalars, coalesced into one `Block` by the
    /// compiler - kept distinct from `Block` only so the compiler can
    /// tell "this is already one field's worth of bytes" apart from
    /// "these two adjacent scalar fields happen to be contiguous".
    InlineScalarArray,
}

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub offset: usize,
    pub size: usize,
    pub archetype: FieldArchetype,
    pub visibility_condition_field: Option<String>,
    pub visibility_condition_values: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StructDescriptor {
    pub name: String,
    pub size: usize,
    pub fields: Vec<FieldDescriptor>,
}

/// Resolves a `Struct`/`StructDynamicArray` field's element type name to
/// its descriptor so the script compiler can inline the child script.
/// The reflection registry this engine runs against implements this;
/// tests supply an in-memory `HashMap`-backed stand-in.
pub trait TypeRegistry {
    fn lookup(&self, type_name: &str) -> Option<&StructDescriptor>;
}

#[derive(Debug, Default)]
pub struct StaticTypeRegistry {
    types: std::collections::HashMap<String, StructDescriptor>,
}

impl StaticTypeRegistry {
    pub fn new() -> Self {
        StaticTypeRegistry::default()
    }

    pub fn insert(&mut self, descriptor: StructDescriptor) {
        self.types.insert(descriptor.name.clone(), descriptor);
    }
}

impl TypeRegistry for StaticTypeRegistry {
    fn lookup(&self, type_name: &str) -> Option<&StructDescriptor> {
        self.types.get(type_name)
    }
}
