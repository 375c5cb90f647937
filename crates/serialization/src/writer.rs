//! Step-oriented writer (§4.3.2). Each [`Writer::step`] call emits at
//! most one command's worth of bytes and returns control to the
//! caller, so many independent writers can be multiplexed cooperatively.

use crate::cache::ScriptCache;
use crate::condition;
use crate::instance::{FieldValue, Instance};
use crate::interned::{write_interned, InternedStringPool, InternedStringRegistry};
use crate::patch::write_patch;
use crate::reflect::TypeRegistry;
use crate::script::{Command, Script};
use crate::step::StepOutcome;
use crate::wire::{write_string, write_u32};
use std::io::Write;
use std::sync::Arc;

struct Frame<'a> {
    script: Arc<Script>,
    instance: &'a Instance,
    conditions: Vec<bool>,
    command_idx: usize,
    array_progress: usize,
}

pub struct Writer<'a> {
    registry: &'a dyn TypeRegistry,
    cache: &'a ScriptCache,
    interned_registry: Option<&'a InternedStringRegistry>,
    pool: &'a InternedStringPool,
    stack: Vec<Frame<'a>>,
}

impl<'a> Writer<'a> {
    pub fn new(
        type_name: &str,
        instance: &'a Instance,
        registry: &'a dyn TypeRegistry,
        cache: &'a ScriptCache,
        interned_registry: Option<&'a InternedStringRegistry>,
        pool: &'a InternedStringPool,
    ) -> Result<Self, crate::error::ScriptError> {
        let script = cache.get_or_compile(type_name, registry)?;
        let conditions = condition::eager_all(&script.conditions, instance);
        Ok(Writer {
            registry,
            cache,
            interned_registry,
            pool,
            stack: vec![Frame { script, instance, conditions, command_idx: 0, array_progress: 0 }],
        })
    }

    /// Writes `instance` to completion against a plain [`std::io::Write`],
    /// driving [`Writer::step`] until it stops returning `InProgress`.
    /// Convenience for callers that don't need cooperative multiplexing.
    pub fn run_to_completion<W: Write>(&mut self, out: &mut W) -> StepOutcome {
        loop {
            match self.step(out) {
                StepOutcome::InProgress => continue,
                other => return other,
            }
        }
    }

    pub fn step<W: Write>(&mut self, out: &mut W) -> StepOutcome {
        let Some(top) = self.stack.last() else { return StepOutcome::Finished };
        if top.command_idx >= top.script.commands.len() {
            self.stack.pop();
            return if self.stack.is_empty() { StepOutcome::Finished } else { StepOutcome::InProgress };
        }

        let i = self.stack.len() - 1;
        let command = self.stack[i].script.commands[self.stack[i].command_idx].clone();
        let visible = match command.condition() {
            Some(idx) => self.stack[i].conditions[idx],
            None => true,
        };
        if !visible {
            self.stack[i].command_idx += 1;
            return StepOutcome::InProgress;
        }

        match self.write_command(out, &command) {
            Ok(true) => {
                self.stack[i].command_idx += 1;
                self.stack[i].array_progress = 0;
                StepOutcome::InProgress
            }
            Ok(false) => StepOutcome::InProgress,
            Err(_) => StepOutcome::Failed,
        }
    }

    /// Returns `Ok(true)` when the command is fully emitted and the
    /// frame should advance past it, `Ok(false)` when one element of a
    /// multi-step command (a struct array pushing a child frame) was
    /// handled and the same command should be revisited next step.
    fn write_command<W: Write>(&mut self, out: &mut W, command: &Command) -> std::io::Result<bool> {
        let i = self.stack.len() - 1;
        // Copying the reference out detaches it from `self`'s borrow -
        // the `Instance` data itself lives for `'a`, not for however
        // long this method call holds `&mut self`.
        let instance_ref: &'a Instance = self.stack[i].instance;
        let field = |offset: usize| instance_ref.get(&offset).ok_or_else(missing_field);

        match command {
            Command::Block { offset, .. } => {
                let FieldValue::Bytes(bytes) = field(*offset)? else { return Err(wrong_kind()) };
                out.write_all(bytes)?;
                Ok(true)
            }
            Command::String { offset, .. } => {
                let FieldValue::Str(value) = field(*offset)? else { return Err(wrong_kind()) };
                write_string(out, value)?;
                Ok(true)
            }
            Command::InternedString { offset, .. } => {
                let FieldValue::InternedId(id) = field(*offset)? else { return Err(wrong_kind()) };
                write_interned(out, *id, self.interned_registry, self.pool)?;
                Ok(true)
            }
            Command::Patch { offset, .. } => {
                let FieldValue::PatchVal(patch) = field(*offset)? else { return Err(wrong_kind()) };
                write_patch(out, patch, Some(self.registry), self.interned_registry, self.pool)?;
                Ok(true)
            }
            Command::BlockDynamicArray { offset, .. } => {
                let FieldValue::BlockArray(elements) = field(*offset)? else { return Err(wrong_kind()) };
                write_u32(out, elements.len() as u32)?;
                for element in elements {
                    out.write_all(element)?;
                }
                Ok(true)
            }
            Command::StringDynamicArray { offset, .. } => {
                let FieldValue::StringArray(elements) = field(*offset)? else { return Err(wrong_kind()) };
                write_u32(out, elements.len() as u32)?;
                for element in elements {
                    write_string(out, element)?;
                }
                Ok(true)
            }
            Command::InternedStringDynamicArray { offset, .. } => {
                let FieldValue::InternedArray(elements) = field(*offset)? else { return Err(wrong_kind()) };
                write_u32(out, elements.len() as u32)?;
                for id in elements {
                    write_interned(out, *id, self.interned_registry, self.pool)?;
                }
                Ok(true)
            }
            Command::PatchDynamicArray { offset, .. } => {
                let FieldValue::PatchArray(elements) = field(*offset)? else { return Err(wrong_kind()) };
                write_u32(out, elements.len() as u32)?;
                for patch in elements {
                    write_patch(out, patch, Some(self.registry), self.interned_registry, self.pool)?;
                }
                Ok(true)
            }
            Command::StructDynamicArray { offset, element_type, .. } => {
                let FieldValue::StructArray(elements) = field(*offset)? else { return Err(wrong_kind()) };
                if self.stack[i].array_progress == 0 {
                    write_u32(out, elements.len() as u32)?;
                }
                if self.stack[i].array_progress >= elements.len() {
                    return Ok(true);
                }
                let idx = self.stack[i].array_progress;
                self.stack[i].array_progress += 1;
                let element_instance: &'a Instance = &elements[idx];
                let child_script = self
                    .cache
                    .get_or_compile(element_type, self.registry)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
                let child_conditions = condition::eager_all(&child_script.conditions, element_instance);
                self.stack.push(Frame {
                    script: child_script,
                    instance: element_instance,
                    conditions: child_conditions,
                    command_idx: 0,
                    array_progress: 0,
                });
                Ok(false)
            }
        }
    }

}

fn missing_field() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, "instance is missing a field the script requires")
}

fn wrong_kind() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, "instance field does not match the command's expected kind")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::{FieldArchetype, FieldDescriptor, StaticTypeRegistry, StructDescriptor};

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
    fn writes_a_coalesced_block_in_one_step() {
        let registry = registry_with_vec3();
        let cache = ScriptCache::new();
        let pool = InternedStringPool::new();
        let mut instance = Instance::new();
        instance.insert(0, FieldValue::Bytes((1.0f32).to_le_bytes().iter().chain((2.0f32).to_le_bytes().iter()).chain((3.0f32).to_le_bytes().iter()).copied().collect()));
        let mut writer = Writer::new("Vec3", &instance, &registry, &cache, None, &pool).unwrap();
        let mut out = Vec::new();
        assert_eq!(writer.run_to_completion(&mut out), StepOutcome::Finished);
        assert_eq!(out.len(), 12);
    }

    #[test]
    fn missing_field_fails_without_panicking() {
        let registry = registry_with_vec3();
        let cache = ScriptCache::new();
        let pool = InternedStringPool::new();
        let instance = Instance::new();
        let mut writer = Writer::new("Vec3", &instance, &registry, &cache, None, &pool).unwrap();
        let mut out = Vec::new();
        assert_eq!(writer.run_to_completion(&mut out), StepOutcome::Failed);
    }
}
