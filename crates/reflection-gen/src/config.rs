//! Configuration for extending the reflection preprocessor without
//! touching its source.
//!
//! Follows the same shape as the lint engine this crate's parser was
//! modeled on: an embedded default table, optionally overridden by a TOML
//! file the caller points us at. Today the only configurable surface is
//! the scalar-to-archetype table that stands in for the original tool's
//! `_Generic` dispatch (see the "`_Generic` archetype selection" open
//! question) - a reimplementation that can't defer to the C compiler has
//! to carry that mapping as data somewhere, and data the caller can extend
//! is more useful than a hardcoded match.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Embedded default scalar archetype table.
pub static DEFAULT_SCALARS: &str = include_str!("scalar_archetypes.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarArchetype {
    SignedInt,
    UnsignedInt,
    Floating,
}

#[derive(Debug, Clone, Deserialize)]
struct ScalarEntry {
    name: String,
    archetype: ScalarArchetype,
}

#[derive(Debug, Clone, Deserialize)]
struct ScalarTableFile {
    #[serde(default)]
    scalar: Vec<ScalarEntry>,
}

/// Maps C scalar type names (`int`, `uint32_t`, `double`, ...) to the
/// archetype the field descriptor should carry.
#[derive(Debug, Clone)]
pub struct ReflectionConfig {
    scalars: HashMap<String, ScalarArchetype>,
}

impl ReflectionConfig {
    pub fn from_toml(toml_str: &str) -> Result<Self, String> {
        let parsed: ScalarTableFile =
            toml::from_str(toml_str).map_err(|e| format!("failed to parse scalar table: {e}"))?;
        let scalars = parsed
            .scalar
            .into_iter()
            .map(|e| (e.name, e.archetype))
            .collect();
        Ok(ReflectionConfig { scalars })
    }

    pub fn default_table() -> Self {
        Self::from_toml(DEFAULT_SCALARS).expect("embedded scalar_archetypes.toml must parse")
    }

    pub fn load(override_path: Option<&Path>) -> Result<Self, String> {
        match override_path {
            None => Ok(Self::default_table()),
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| format!("{}: {e}", path.display()))?;
                Self::from_toml(&text)
            }
        }
    }

    pub fn lookup(&self, type_name: &str) -> Option<ScalarArchetype> {
        self.scalars.get(type_name).copied()
    }
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self::default_table()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_knows_common_c_scalars() {
        let cfg = ReflectionConfig::default_table();
        assert_eq!(cfg.lookup("int"), Some(ScalarArchetype::SignedInt));
        assert_eq!(cfg.lookup("uint32_t"), Some(ScalarArchetype::UnsignedInt));
        assert_eq!(cfg.lookup("double"), Some(ScalarArchetype::Floating));
        assert_eq!(cfg.lookup("not_a_real_type"), None);
    }

    #[test]
    fn override_table_replaces_the_default_entirely() {
        let cfg = ReflectionConfig::from_toml(
            r#"
            [[scalar]]
            name = "my_int_t"
            archetype = "signed_int"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.lookup("my_int_t"), Some(ScalarArchetype::SignedInt));
        assert_eq!(cfg.lookup("int"), None);
    }
}
