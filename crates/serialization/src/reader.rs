//! Step-oriented reader (§4.3.2), the mirror image of
//! [`crate::writer::Writer`]. Unlike the writer, each frame owns its
//! `Instance` outright - reading builds fresh data with nothing to
//! borrow from the caller, so there's no lifetime to thread through.

use crate::cache::ScriptCache;
use crate::condition;
use crate::instance::{FieldValue, Instance};
use crate::interned::{read_interned, InternedStringPool, InternedStringRegistry};
use crate::patch::{read_patch, Patch, PatchBuilder};
use crate::reflect::TypeRegistry;
use crate::script::{Command, Script};
use crate::step::StepOutcome;
use crate::wire::{read_string, read_u32};
use std::io::Read;
use std::sync::Arc;

struct NullBuilder;
impl PatchBuilder for NullBuilder {
    fn chunk(&mut self, _section_handle: u32, _offset: u32, _size: u32, _bytes: &[u8]) {}
    fn section(&mut self, _parent_handle: u32, _my_handle: u32, _section_type: u32, _offset_in_parent: u32) {}
}

struct ReadFrame {
    script: Arc<Script>,
    instance: Instance,
    condition_cache: Vec<Option<bool>>,
    command_idx: usize,
    array_offset: usize,
    array_count: Option<u32>,
    array_progress: usize,
    collected: Vec<Instance>,
}

impl ReadFrame {
    fn new(script: Arc<Script>) -> Self {
        let condition_cache = vec![None; script.conditions.len()];
        ReadFrame {
            script,
            instance: Instance::new(),
            condition_cache,
            command_idx: 0,
            array_offset: 0,
            array_count: None,
            array_progress: 0,
            collected: Vec::new(),
        }
    }
}

pub struct Reader<'a> {
    registry: &'a dyn TypeRegistry,
    cache: &'a ScriptCache,
    interned_registry: Option<&'a InternedStringRegistry>,
    pool: &'a InternedStringPool,
    stack: Vec<ReadFrame>,
    result: Option<Instance>,
}

impl<'a> Reader<'a> {
    pub fn new(
        type_name: &str,
        registry: &'a dyn TypeRegistry,
        cache: &'a ScriptCache,
        interned_registry: Option<&'a InternedStringRegistry>,
        pool: &'a InternedStringPool,
    ) -> Result<Self, crate::error::ScriptError> {
        let script = cache.get_or_compile(type_name, registry)?;
        Ok(Reader {
            registry,
            cache,
            interned_registry,
            pool,
            stack: vec![ReadFrame::new(script)],
            result: None,
        })
    }

    /// Reads to completion against a plain [`std::io::Read`], driving
    /// [`Reader::step`] until it stops returning `InProgress`.
    pub fn run_to_completion<R: Read>(&mut self, input: &mut R) -> StepOutcome {
        loop {
            match self.step(input) {
                StepOutcome::InProgress => continue,
                other => return other,
            }
        }
    }

    /// Takes the finished root instance. Only meaningful once `step`
    /// has returned `StepOutcome::Finished`.
    pub fn into_instance(self) -> Option<Instance> {
        self.result
    }

    pub fn step<R: Read>(&mut self, input: &mut R) -> StepOutcome {
        if self.result.is_some() {
            return StepOutcome::Finished;
        }
        let Some(top) = self.stack.last() else { return StepOutcome::Failed };

        if top.command_idx >= top.script.commands.len() {
            let finished = self.stack.pop().unwrap();
            return match self.stack.last_mut() {
                Some(parent) => {
                    parent.collected.push(finished.instance);
                    parent.array_progress += 1;
                    StepOutcome::InProgress
                }
                None => {
                    self.result = Some(finished.instance);
                    StepOutcome::Finished
                }
            };
        }

        let i = self.stack.len() - 1;
        let command = self.stack[i].script.commands[self.stack[i].command_idx].clone();
        let visible = match command.condition() {
            Some(idx) => {
                let frame = &mut self.stack[i];
                match condition::evaluate(&frame.script.conditions, &frame.instance, idx, &mut frame.condition_cache) {
                    Some(v) => v,
                    None => return StepOutcome::Failed,
                }
            }
            None => true,
        };
        if !visible {
            self.stack[i].command_idx += 1;
            return StepOutcome::InProgress;
        }

        match self.read_command(input, &command) {
            Ok(true) => {
                self.stack[i].command_idx += 1;
                StepOutcome::InProgress
            }
            Ok(false) => StepOutcome::InProgress,
            Err(_) => StepOutcome::Failed,
        }
    }

    /// Mirrors [`crate::writer::Writer::write_command`]: `Ok(true)`
    /// advances past the command, `Ok(false)` means a struct array
    /// pushed a child frame and the same command needs revisiting.
    fn read_command<R: Read>(&mut self, input: &mut R, command: &Command) -> std::io::Result<bool> {
        let i = self.stack.len() - 1;
        match command {
            Command::Block { offset, size, .. } => {
                let mut bytes = vec![0u8; *size];
                input.read_exact(&mut bytes)?;
                self.stack[i].instance.insert(*offset, FieldValue::Bytes(bytes));
                Ok(true)
            }
            Command::String { offset, .. } => {
                let value = read_string(input)?;
                self.stack[i].instance.insert(*offset, FieldValue::Str(value));
                Ok(true)
            }
            Command::InternedString { offset, .. } => {
                let id = read_interned(input, self.interned_registry, self.pool)?;
                self.stack[i].instance.insert(*offset, FieldValue::InternedId(id));
                Ok(true)
            }
            Command::Patch { offset, .. } => {
                let patch = read_patch(input, Some(self.registry), self.interned_registry, self.pool, &mut NullBuilder)?;
                self.stack[i].instance.insert(*offset, FieldValue::PatchVal(patch));
                Ok(true)
            }
            Command::BlockDynamicArray { offset, .. } => {
                let count = read_u32(input)?;
                let mut elements = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    elements.push(read_bytes_element(input)?);
                }
                self.stack[i].instance.insert(*offset, FieldValue::BlockArray(elements));
                Ok(true)
            }
            Command::StringDynamicArray { offset, .. } => {
                let count = read_u32(input)?;
                let mut elements = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    elements.push(read_string(input)?);
                }
                self.stack[i].instance.insert(*offset, FieldValue::StringArray(elements));
                Ok(true)
            }
            Command::InternedStringDynamicArray { offset, .. } => {
                let count = read_u32(input)?;
                let mut elements = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    elements.push(read_interned(input, self.interned_registry, self.pool)?);
                }
                self.stack[i].instance.insert(*offset, FieldValue::InternedArray(elements));
                Ok(true)
            }
            Command::PatchDynamicArray { offset, .. } => {
                let count = read_u32(input)?;
                let mut elements: Vec<Patch> = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    elements.push(read_patch(input, Some(self.registry), self.interned_registry, self.pool, &mut NullBuilder)?);
                }
                self.stack[i].instance.insert(*offset, FieldValue::PatchArray(elements));
                Ok(true)
            }
            Command::StructDynamicArray { offset, element_type, .. } => {
                if self.stack[i].array_count.is_none() {
                    let count = read_u32(input)?;
                    self.stack[i].array_count = Some(count);
                    self.stack[i].array_progress = 0;
                    self.stack[i].array_offset = *offset;
                    self.stack[i].collected = Vec::with_capacity(count as usize);
                }
                let count = self.stack[i].array_count.unwrap();
                if self.stack[i].array_progress as u32 >= count {
                    let offset = self.stack[i].array_offset;
                    let elements = std::mem::take(&mut self.stack[i].collected);
                    self.stack[i].instance.insert(offset, FieldValue::StructArray(elements));
                    self.stack[i].array_count = None;
                    return Ok(true);
                }
                let child_script = self
                    .cache
                    .get_or_compile(element_type, self.registry)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
                self.stack.push(ReadFrame::new(child_script));
                Ok(false)
            }
        }
    }

}

fn read_bytes_element<R: Read>(input: &mut R) -> std::io::Result<Vec<u8>> {
    let len = read_u32(input)? as usize;
    let mut buf = vec![0u8; len];
    input.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::{FieldArchetype, FieldDescriptor, StaticTypeRegistry, StructDescriptor};
    use crate::writer::Writer;
    use std::io::Cursor;

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

    fn registry_with_vec3() -> StaticTypeRegistry {
        let mut registry = StaticTypeRegistry::new();
        registry.insert(StructDescriptor {
            name: "Vec3".to_string(),
            size: 12,
            fields: vec![
                field("x", 0, 4, FieldArchetype::Block),
                field("y", 4, 4, FieldArchetype::Block),
                field("z", 8, 4, FieldArchetype::Block),
            ],
        });
        registry
    }

    #[test]
    fn reads_back_a_coalesced_block() {
        let registry = registry_with_vec3();
        let cache = ScriptCache::new();
        let pool = InternedStringPool::new();
        let buf: Vec<u8> = (1.0f32).to_le_bytes().iter().chain((2.0f32).to_le_bytes().iter()).chain((3.0f32).to_le_bytes().iter()).copied().collect();

        let mut reader = Reader::new("Vec3", &registry, &cache, None, &pool).unwrap();
        assert_eq!(reader.run_to_completion(&mut Cursor::new(buf.clone())), StepOutcome::Finished);
        let instance = reader.into_instance().unwrap();
        assert_eq!(instance.get(&0), Some(&FieldValue::Bytes(buf)));
    }

    #[test]
    fn truncated_input_fails_without_panicking() {
        let registry = registry_with_vec3();
        let cache = ScriptCache::new();
        let pool = InternedStringPool::new();
        let mut reader = Reader::new("Vec3", &registry, &cache, None, &pool).unwrap();
        assert_eq!(reader.run_to_completion(&mut Cursor::new(vec![1, 2, 3])), StepOutcome::Failed);
    }

    #[test]
    fn struct_dynamic_array_round_trips_through_writer_and_reader() {
        let mut registry = StaticTypeRegistry::new();
        registry.insert(StructDescriptor {
            name: "Point".to_string(),
            size: 4,
            fields: vec![field("v", 0, 4, FieldArchetype::Block)],
        });
        registry.insert(StructDescriptor {
            name: "Cloud".to_string(),
            size: 8,
            fields: vec![field("points", 0, 8, FieldArchetype::StructDynamicArray("Point".to_string()))],
        });
        let cache = ScriptCache::new();
        let pool = InternedStringPool::new();

        let mut point_a = Instance::new();
        point_a.insert(0, FieldValue::Bytes(vec![1, 0, 0, 0]));
        let mut point_b = Instance::new();
        point_b.insert(0, FieldValue::Bytes(vec![2, 0, 0, 0]));
        let mut cloud = Instance::new();
        cloud.insert(0, FieldValue::StructArray(vec![point_a, point_b]));

        let mut writer = Writer::new("Cloud", &cloud, &registry, &cache, None, &pool).unwrap();
        let mut buf = Vec::new();
        assert_eq!(writer.run_to_completion(&mut buf), StepOutcome::Finished);

        let mut reader = Reader::new("Cloud", &registry, &cache, None, &pool).unwrap();
        assert_eq!(reader.run_to_completion(&mut Cursor::new(buf)), StepOutcome::Finished);
        let instance = reader.into_instance().unwrap();
        let Some(FieldValue::StructArray(points)) = instance.get(&0) else { panic!("expected struct array") };
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].get(&0), Some(&FieldValue::Bytes(vec![1, 0, 0, 0])));
        assert_eq!(points[1].get(&0), Some(&FieldValue::Bytes(vec![2, 0, 0, 0])));
    }

    #[test]
    fn conditioned_field_is_skipped_when_the_tag_says_so() {
        let mut registry = StaticTypeRegistry::new();
        registry.insert(StructDescriptor {
            name: "Tagged".to_string(),
            size: 8,
            fields: vec![
                field("tag", 0, 4, FieldArchetype::Block),
                FieldDescriptor {
                    visibility_condition_field: Some("tag".to_string()),
                    visibility_condition_values: vec!["1".to_string()],
                    ..field("payload", 4, 4, FieldArchetype::Block)
                },
            ],
        });
        let cache = ScriptCache::new();
        let pool = InternedStringPool::new();
        // tag == 0, so payload is invisible and must not be read off the wire.
        let buf = 0i32.to_le_bytes().to_vec();
        let mut reader = Reader::new("Tagged", &registry, &cache, None, &pool).unwrap();
        assert_eq!(reader.run_to_completion(&mut Cursor::new(buf)), StepOutcome::Finished);
        let instance = reader.into_instance().unwrap();
        assert!(instance.get(&4).is_none());
    }
}
