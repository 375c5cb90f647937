//! Script cache (§5): one lock guarding the slot table, one
//! [`OnceLock`] per slot so concurrent first-touch of the same type
//! compiles it exactly once without holding the table lock during
//! compilation itself.

use crate::error::ScriptError;
use crate::reflect::TypeRegistry;
use crate::script::{self, Script};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

#[derive(Default)]
pub struct ScriptCache {
    slots: Mutex<HashMap<String, Arc<OnceLock<Arc<Script>>>>>,
}

impl ScriptCache {
    pub fn new() -> Self {
        ScriptCache::default()
    }

    /// Returns the cached script for `type_name`, compiling it on first
    /// touch. The table lock is released before compilation runs, so a
    /// second caller racing for a different type never blocks on this
    /// one; a second caller racing for the *same* type blocks on the
    /// slot's `OnceLock` instead.
    pub fn get_or_compile(&self, type_name: &str, registry: &dyn TypeRegistry) -> Result<Arc<Script>, ScriptError> {
        let slot = {
            let mut slots = self.slots.lock().expect("script cache lock poisoned");
            slots.entry(type_name.to_string()).or_insert_with(|| Arc::new(OnceLock::new())).clone()
        };

        if let Some(script) = slot.get() {
            return Ok(script.clone());
        }

        let descriptor = registry
            .lookup(type_name)
            .ok_or_else(|| ScriptError::UnknownType(type_name.to_string()))?;
        let compiled = Arc::new(script::compile(descriptor, registry)?);
        Ok(slot.get_or_init(|| compiled).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::{FieldArchetype, FieldDescriptor, StaticTypeRegistry, StructDescriptor};

    fn registry_with_one_type() -> StaticTypeRegistry {
        let mut registry = StaticTypeRegistry::new();
        registry.insert(StructDescriptor {
            name: "T".to_string(),
            size: 4,
            fields: vec![FieldDescriptor {
                name: "x".to_string(),
                offset: 0,
                size: 4,
                archetype: FieldArchetype::Block,
                visibility_condition_field: None,
                visibility_condition_values: Vec::new(),
            }],
        });
        registry
    }

    #[test]
    fn second_lookup_reuses_the_first_compilation() {
        let cache = ScriptCache::new();
        let registry = registry_with_one_type();
        let a = cache.get_or_compile("T", &registry).unwrap();
        let b = cache.get_or_compile("T", &registry).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn unknown_type_is_an_error_and_does_not_poison_the_cache() {
        let cache = ScriptCache::new();
        let registry = registry_with_one_type();
        assert!(cache.get_or_compile("Ghost", &registry).is_err());
        assert!(cache.get_or_compile("T", &registry).is_ok());
    }
}
