//! Archetype selection: deciding how a field's bytes should be
//! interpreted, from its `TypeInfo`, its meta, and (for inline arrays) the
//! element's own type.

use crate::config::{ReflectionConfig, ScalarArchetype};
use crate::meta::MetaStore;
use crate::typeinfo::{TypeGroup, TypeInfo};
use kan_codegen_core::Diagnostic;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Archetype {
    SignedInt,
    UnsignedInt,
    Floating,
    StringPointer,
    ExternalPointer,
    StructPointer(String),
    InternedString,
    Patch,
    DynamicArray(Box<Archetype>),
    Struct(String),
    InlineArray {
        element: Box<Archetype>,
        size_field_index: Option<String>,
    },
}

/// §4.1.6: choose the archetype for a struct field given its parsed type
/// and the meta attached to it. `is_inline_array_element` is true when
/// this call is selecting the *element* archetype of an `INLINE_ARRAY`,
/// since array suffixes themselves are handled by the caller and must not
/// recurse into `InlineArray` again.
pub fn select_field_archetype(
    type_info: &TypeInfo,
    meta: &MetaStore,
    config: &ReflectionConfig,
    path: &str,
    line: u32,
    column: u32,
) -> Result<Archetype, Diagnostic> {
    if type_info.is_char_pointer(1) && !meta.external_pointer {
        return Ok(Archetype::StringPointer);
    }

    if type_info.pointer_level >= 1 {
        if type_info.group == TypeGroup::Struct
            && type_info.pointer_level == 1
            && !meta.external_pointer
        {
            return Ok(Archetype::StructPointer(type_info.name.clone()));
        }
        if type_info.pointer_level >= 2 || meta.external_pointer || type_info.group != TypeGroup::Struct
        {
            return Ok(Archetype::ExternalPointer);
        }
    }

    if type_info.group == TypeGroup::Value {
        match type_info.name.as_str() {
            "kan_interned_string_t" => return Ok(Archetype::InternedString),
            "kan_reflection_patch_t" => return Ok(Archetype::Patch),
            "kan_dynamic_array_t" => {
                let element_type = meta.dynamic_array_type.as_ref().ok_or_else(|| {
                    Diagnostic::new(
                        path,
                        line,
                        column,
                        "kan_dynamic_array_t field requires kan_reflection_dynamic_array_type meta",
                    )
                })?;
                let element =
                    select_field_archetype(element_type, meta, config, path, line, column)?;
                return Ok(Archetype::DynamicArray(Box::new(element)));
            }
            _ => {}
        }
        if let Some(scalar) = config.lookup(&type_info.name) {
            return Ok(match scalar {
                ScalarArchetype::SignedInt => Archetype::SignedInt,
                ScalarArchetype::UnsignedInt => Archetype::UnsignedInt,
                ScalarArchetype::Floating => Archetype::Floating,
            });
        }
    }

    if type_info.group == TypeGroup::Struct {
        return Ok(Archetype::Struct(type_info.name.clone()));
    }

    Err(Diagnostic::new(
        path,
        line,
        column,
        format!("unrecognized field type '{}'", type_info.name),
    ))
}

/// Wrap an already-selected element archetype for an inline (fixed-size)
/// array suffix, recording which other field carries its length.
pub fn inline_array_archetype(element: Archetype, size_field_index: Option<String>) -> Archetype {
    Archetype::InlineArray {
        element: Box::new(element),
        size_field_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typeinfo::TypeGroup;

    fn t(name: &str, group: TypeGroup, pointer_level: u8) -> TypeInfo {
        TypeInfo {
            name: name.to_string(),
            group,
            is_const: false,
            pointer_level,
        }
    }

    #[test]
    fn char_pointer_level_one_is_string_pointer() {
        let cfg = ReflectionConfig::default_table();
        let ty = t("char", TypeGroup::Value, 1);
        let m = MetaStore::new();
        assert_eq!(
            select_field_archetype(&ty, &m, &cfg, "f.h", 1, 1).unwrap(),
            Archetype::StringPointer
        );
    }

    #[test]
    fn struct_pointer_level_one_is_struct_pointer() {
        let cfg = ReflectionConfig::default_table();
        let ty = t("Foo", TypeGroup::Struct, 1);
        let m = MetaStore::new();
        assert_eq!(
            select_field_archetype(&ty, &m, &cfg, "f.h", 1, 1).unwrap(),
            Archetype::StructPointer("Foo".to_string())
        );
    }

    #[test]
    fn struct_pointer_with_external_pointer_meta_is_external() {
        let cfg = ReflectionConfig::default_table();
        let ty = t("Foo", TypeGroup::Struct, 1);
        let mut m = MetaStore::new();
        m.external_pointer = true;
        assert_eq!(
            select_field_archetype(&ty, &m, &cfg, "f.h", 1, 1).unwrap(),
            Archetype::ExternalPointer
        );
    }

    #[test]
    fn double_pointer_to_struct_is_external() {
        let cfg = ReflectionConfig::default_table();
        let ty = t("Foo", TypeGroup::Struct, 2);
        let m = MetaStore::new();
        assert_eq!(
            select_field_archetype(&ty, &m, &cfg, "f.h", 1, 1).unwrap(),
            Archetype::ExternalPointer
        );
    }

    #[test]
    fn pointer_to_enum_is_external() {
        let cfg = ReflectionConfig::default_table();
        let ty = t("Color", TypeGroup::Enum, 1);
        let m = MetaStore::new();
        assert_eq!(
            select_field_archetype(&ty, &m, &cfg, "f.h", 1, 1).unwrap(),
            Archetype::ExternalPointer
        );
    }

    #[test]
    fn dynamic_array_requires_element_meta() {
        let cfg = ReflectionConfig::default_table();
        let ty = t("kan_dynamic_array_t", TypeGroup::Value, 0);
        let m = MetaStore::new();
        assert!(select_field_archetype(&ty, &m, &cfg, "f.h", 1, 1).is_err());
    }

    #[test]
    fn dynamic_array_with_element_meta_wraps_element_archetype() {
        let cfg = ReflectionConfig::default_table();
        let ty = t("kan_dynamic_array_t", TypeGroup::Value, 0);
        let mut m = MetaStore::new();
        m.dynamic_array_type = Some(t("uint32_t", TypeGroup::Value, 0));
        let archetype = select_field_archetype(&ty, &m, &cfg, "f.h", 1, 1).unwrap();
        assert_eq!(
            archetype,
            Archetype::DynamicArray(Box::new(Archetype::UnsignedInt))
        );
    }

    #[test]
    fn plain_struct_field_is_struct_archetype() {
        let cfg = ReflectionConfig::default_table();
        let ty = t("Foo", TypeGroup::Struct, 0);
        let m = MetaStore::new();
        assert_eq!(
            select_field_archetype(&ty, &m, &cfg, "f.h", 1, 1).unwrap(),
            Archetype::Struct("Foo".to_string())
        );
    }

    #[test]
    fn numeric_scalar_resolves_via_config_table() {
        let cfg = ReflectionConfig::default_table();
        let ty = t("double", TypeGroup::Value, 0);
        let m = MetaStore::new();
        assert_eq!(
            select_field_archetype(&ty, &m, &cfg, "f.h", 1, 1).unwrap(),
            Archetype::Floating
        );
    }
}
