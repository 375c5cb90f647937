//! Script compilation (§4.3.1): walking a struct's fields in
//! declaration order and producing the flat command/condition vectors
//! that the reader and writer step machines replay.

use crate::error::ScriptError;
use crate::reflect::{FieldArchetype, StructDescriptor, TypeRegistry};
use std::collections::HashMap;

/// A governing field plus the values that make a dependent command
/// visible. `parent` chains to an enclosing condition so a field nested
/// two levels deep inside conditioned unions only re-checks the layers
/// it actually depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub field_offset: usize,
    pub field_size: usize,
    pub allowed_values: Vec<String>,
    pub parent: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Block { offset: usize, size: usize, condition: Option<usize> },
    String { offset: usize, condition: Option<usize> },
    InternedString { offset: usize, condition: Option<usize> },
    Patch { offset: usize, condition: Option<usize> },
    BlockDynamicArray { offset: usize, condition: Option<usize> },
    StringDynamicArray { offset: usize, condition: Option<usize> },
    InternedStringDynamicArray { offset: usize, condition: Option<usize> },
    StructDynamicArray { offset: usize, element_type: String, condition: Option<usize> },
    PatchDynamicArray { offset: usize, condition: Option<usize> },
}

impl Command {
    pub fn condition(&self) -> Option<usize> {
        match self {
            Command::Block { condition, .. }
            | Command::String { condition, .. }
            | Command::InternedString { condition, .. }
            | Command::Patch { condition, .. }
            | Command::BlockDynamicArray { condition, .. }
            | Command::StringDynamicArray { condition, .. }
            | Command::InternedStringDynamicArray { condition, .. }
            | Command::StructDynamicArray { condition, .. }
            | Command::PatchDynamicArray { condition, .. } => *condition,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub commands: Vec<Command>,
    pub conditions: Vec<Condition>,
}

type ConditionKey = (usize, Vec<String>, Option<usize>);

pub fn compile(descriptor: &StructDescriptor, registry: &dyn TypeRegistry) -> Result<Script, ScriptError> {
    let mut script = Script::default();
    let mut cache: HashMap<ConditionKey, usize> = HashMap::new();
    compile_into(descriptor, 0, None, registry, &mut script, &mut cache)?;
    Ok(script)
}

fn compile_into(
    descriptor: &StructDescriptor,
    base_offset: usize,
    outer_condition: Option<usize>,
    registry: &dyn TypeRegistry,
    script: &mut Script,
    cache: &mut HashMap<ConditionKey, usize>,
) -> Result<(), ScriptError> {
    let mut pending: Option<(usize, usize, Option<usize>)> = None;

    for field in &descriptor.fields {
        let abs_offset = base_offset + field.offset;
        let condition = match &field.visibility_condition_field {
            Some(governing_name) => {
                let governing = descriptor
                    .fields
                    .iter()
                    .find(|f| &f.name == governing_name)
                    .ok_or_else(|| ScriptError::UnknownField {
                        struct_name: descriptor.name.clone(),
                        field_name: governing_name.clone(),
                    })?;
                let key: ConditionKey = (base_offset + governing.offset, field.visibility_condition_values.clone(), outer_condition);
                let idx = if let Some(existing) = cache.get(&key) {
                    *existing
                } else {
                    script.conditions.push(Condition {
                        field_offset: key.0,
                        field_size: governing.size,
                        allowed_values: key.1.clone(),
                        parent: outer_condition,
                    });
                    let idx = script.conditions.len() - 1;
                    cache.insert(key, idx);
                    idx
                };
                Some(idx)
            }
            None => outer_condition,
        };

        if matches!(field.archetype, FieldArchetype::Block | FieldArchetype::InlineScalarArray) {
            pending = Some(match pending {
                Some((start, size, cond)) if cond == condition && start + size == abs_offset => (start, size + field.size, cond),
                _ => {
                    flush_pending(script, &mut pending);
                    (abs_offset, field.size, condition)
                }
            });
            continue;
        }
        flush_pending(script, &mut pending);

        match &field.archetype {
            FieldArchetype::String => script.commands.push(Command::String { offset: abs_offset, condition }),
            FieldArchetype::InternedString => script.commands.push(Command::InternedString { offset: abs_offset, condition }),
            FieldArchetype::Patch => script.commands.push(Command::Patch { offset: abs_offset, condition }),
            FieldArchetype::Struct(type_name) => {
                let child = registry.lookup(type_name).ok_or_else(|| ScriptError::UnknownType(type_name.clone()))?;
                compile_into(child, abs_offset, condition, registry, script, cache)?;
            }
            FieldArchetype::BlockDynamicArray => script.commands.push(Command::BlockDynamicArray { offset: abs_offset, condition }),
            FieldArchetype::StringDynamicArray => script.commands.push(Command::StringDynamicArray { offset: abs_offset, condition }),
            FieldArchetype::InternedStringDynamicArray => {
                script.commands.push(Command::InternedStringDynamicArray { offset: abs_offset, condition })
            }
            FieldArchetype::StructDynamicArray(element_type) => script.commands.push(Command::StructDynamicArray {
                offset: abs_offset,
                element_type: element_type.clone(),
                condition,
            }),
            FieldArchetype::PatchDynamicArray => script.commands.push(Command::PatchDynamicArray { offset: abs_offset, condition }),
            FieldArchetype::Block | FieldArchetype::InlineScalarArray => unreachable!("coalesced above"),
        }
    }
    flush_pending(script, &mut pending);
    Ok(())
}

fn flush_pending(script: &mut Script, pending: &mut Option<(usize, usize, Option<usize>)>) {
    if let Some((offset, size, condition)) = pending.take() {
        script.commands.push(Command::Block { offset, size, condition });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::{FieldDescriptor, StaticTypeRegistry};

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
    fn contiguous_scalar_fields_coalesce_into_one_block() {
        let descriptor = StructDescriptor {
            name: "Vec3".to_string(),
            size: 12,
            fields: vec![
                field("x", 0, 4, FieldArchetype::Block),
                field("y", 4, 4, FieldArchetype::Block),
                field("z", 8, 4, FieldArchetype::Block),
            ],
        };
        let registry = StaticTypeRegistry::new();
        let script = compile(&descriptor, &registry).unwrap();
        assert_eq!(script.commands, vec![Command::Block { offset: 0, size: 12, condition: None }]);
    }

    #[test]
    fn a_non_block_field_breaks_the_coalescing_run() {
        let descriptor = StructDescriptor {
            name: "S".to_string(),
            size: 16,
            fields: vec![
                field("a", 0, 4, FieldArchetype::Block),
                field("name", 4, 8, FieldArchetype::String),
                field("b", 12, 4, FieldArchetype::Block),
            ],
        };
        let registry = StaticTypeRegistry::new();
        let script = compile(&descriptor, &registry).unwrap();
        assert_eq!(
            script.commands,
            vec![
                Command::Block { offset: 0, size: 4, condition: None },
                Command::String { offset: 4, condition: None },
                Command::Block { offset: 12, size: 4, condition: None },
            ]
        );
    }

    #[test]
    fn shared_visibility_condition_is_emitted_once() {
        let descriptor = StructDescriptor {
            name: "S".to_string(),
            size: 8,
            fields: vec![
                field("tag", 0, 4, FieldArchetype::Block),
                FieldDescriptor {
                    visibility_condition_field: Some("tag".to_string()),
                    visibility_condition_values: vec!["0".to_string()],
                    ..field("a", 4, 4, FieldArchetype::Block)
                },
                FieldDescriptor {
                    visibility_condition_field: Some("tag".to_string()),
                    visibility_condition_values: vec!["1".to_string()],
                    ..field("b", 4, 4, FieldArchetype::Block)
                },
            ],
        };
        let registry = StaticTypeRegistry::new();
        let script = compile(&descriptor, &registry).unwrap();
        assert_eq!(script.conditions.len(), 2);
        let conditions: Vec<_> = script.commands.iter().filter_map(Command::condition).collect();
        assert_eq!(conditions, vec![0, 1]);
    }

    #[test]
    fn nested_struct_fields_inline_with_rebased_offsets() {
        let mut registry = StaticTypeRegistry::new();
        registry.insert(StructDescriptor {
            name: "Inner".to_string(),
            size: 8,
            fields: vec![field("a", 0, 4, FieldArchetype::Block), field("name", 4, 4, FieldArchetype::String)],
        });
        let outer = StructDescriptor {
            name: "Outer".to_string(),
            size: 12,
            fields: vec![field("lead", 0, 4, FieldArchetype::Block), field("inner", 4, 8, FieldArchetype::Struct("Inner".to_string()))],
        };
        let script = compile(&outer, &registry).unwrap();
        assert_eq!(
            script.commands,
            vec![
                Command::Block { offset: 0, size: 4, condition: None },
                Command::Block { offset: 4, size: 4, condition: None },
                Command::String { offset: 8, condition: None },
            ]
        );
    }

    #[test]
    fn unknown_nested_type_is_a_script_error() {
        let registry = StaticTypeRegistry::new();
        let descriptor = StructDescriptor {
            name: "Outer".to_string(),
            size: 4,
            fields: vec![field("missing", 0, 4, FieldArchetype::Struct("Ghost".to_string()))],
        };
        assert_eq!(compile(&descriptor, &registry).unwrap_err(), ScriptError::UnknownType("Ghost".to_string()));
    }
}
