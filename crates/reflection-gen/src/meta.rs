//! The pragma scratch buffer (`MetaStore`) and the compatibility table that
//! says which declarations can carry which meta.

use crate::typeinfo::TypeInfo;
use kan_codegen_core::Diagnostic;

/// One `kan_reflection_{enum,struct,function}_meta IDENT` attachment.
#[derive(Debug, Clone)]
pub struct TopLevelMeta {
    pub kind: TopLevelMetaKind,
    pub target_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopLevelMetaKind {
    Enum,
    Struct,
    Function,
}

/// One `kan_reflection_{enum_value,struct_field,function_argument}_meta
/// IDENT IDENT` attachment. `secondary_name` is the enum value / field /
/// argument the meta is scoped to.
#[derive(Debug, Clone)]
pub struct SecondaryLevelMeta {
    pub kind: SecondaryLevelMetaKind,
    pub top_name: String,
    pub secondary_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondaryLevelMetaKind {
    EnumValue,
    StructField,
    FunctionArgument,
}

/// A single `kan_reflection_visibility_condition_value TOKEN` pragma body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityConditionValue(pub String);

/// Accumulates pragmas seen since the last top-level declaration. Reset at
/// every input-file switch and after every successful top-level
/// declaration; must be empty at an input-file switch boundary (an
/// unconsumed pragma straddling a `#line` is a bug in the emitting
/// preprocessor upstream of us, and we treat it as fatal rather than
/// silently dropping it).
#[derive(Debug, Default)]
pub struct MetaStore {
    pub export: bool,
    pub flags: bool,
    pub ignore: bool,
    pub external_pointer: bool,
    pub dynamic_array_type: Option<TypeInfo>,
    pub explicit_init: Option<String>,
    pub explicit_shutdown: Option<String>,
    pub size_field: Option<String>,
    pub visibility_condition_field: Option<String>,
    pub visibility_condition_values: Vec<VisibilityConditionValue>,
    pub top_level: Vec<TopLevelMeta>,
    pub secondary_level: Vec<SecondaryLevelMeta>,
}

impl MetaStore {
    pub fn new() -> Self {
        MetaStore::default()
    }

    pub fn is_empty(&self) -> bool {
        !self.export
            && !self.flags
            && !self.ignore
            && !self.external_pointer
            && self.dynamic_array_type.is_none()
            && self.explicit_init.is_none()
            && self.explicit_shutdown.is_none()
            && self.size_field.is_none()
            && self.visibility_condition_field.is_none()
            && self.visibility_condition_values.is_empty()
            && self.top_level.is_empty()
            && self.secondary_level.is_empty()
    }

    pub fn reset(&mut self) {
        *self = MetaStore::default();
    }
}

/// Which declaration kind a `MetaStore` is about to be consumed by. Drives
/// the compatibility table in [`check_compatible`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationKind {
    Typedef,
    Enum,
    EnumValue,
    Struct,
    StructField,
    Function,
    FunctionArgument,
    Symbol,
}

/// Mirrors the repository's meta compatibility matrix: rows are
/// declaration kinds, cells list the meta that declaration is allowed to
/// carry. Anything else collected on the `MetaStore` is a fatal
/// incompatible-combination diagnostic pointing at the declaration.
pub fn check_compatible(
    kind: DeclarationKind,
    meta: &MetaStore,
    path: &str,
    line: u32,
    column: u32,
) -> Result<(), Diagnostic> {
    let mut violations: Vec<&str> = Vec::new();
    let push = |v: &mut Vec<&str>, name: &'static str, present: bool| {
        if present {
            v.push(name);
        }
    };

    match kind {
        DeclarationKind::Typedef => {
            // Typedefs may carry nothing; any meta at all is incompatible.
            if !meta.is_empty() {
                violations.push("any meta on a typedef");
            }
        }
        DeclarationKind::Enum => {
            push(&mut violations, "export", meta.export);
            push(
                &mut violations,
                "explicit_init_functor",
                meta.explicit_init.is_some(),
            );
            push(
                &mut violations,
                "explicit_shutdown_functor",
                meta.explicit_shutdown.is_some(),
            );
            push(&mut violations, "external_pointer", meta.external_pointer);
            push(
                &mut violations,
                "dynamic_array_type",
                meta.dynamic_array_type.is_some(),
            );
            push(&mut violations, "size_field", meta.size_field.is_some());
            push(
                &mut violations,
                "visibility_condition_field",
                meta.visibility_condition_field.is_some(),
            );
        }
        DeclarationKind::EnumValue => {
            // Enum values accept no meta other than `ignore`.
            push(&mut violations, "export", meta.export);
            push(&mut violations, "flags", meta.flags);
            push(&mut violations, "external_pointer", meta.external_pointer);
            push(
                &mut violations,
                "dynamic_array_type",
                meta.dynamic_array_type.is_some(),
            );
            push(
                &mut violations,
                "explicit_init_functor",
                meta.explicit_init.is_some(),
            );
            push(
                &mut violations,
                "explicit_shutdown_functor",
                meta.explicit_shutdown.is_some(),
            );
            push(&mut violations, "size_field", meta.size_field.is_some());
            push(
                &mut violations,
                "visibility_condition_field",
                meta.visibility_condition_field.is_some(),
            );
            if meta.top_level.iter().any(|m| m.kind != TopLevelMetaKind::Enum) {
                violations.push("struct/function meta on an enum value");
            }
        }
        DeclarationKind::Struct => {
            push(&mut violations, "flags", meta.flags);
            push(
                &mut violations,
                "size_field",
                meta.size_field.is_some() && meta.visibility_condition_field.is_none(),
            );
        }
        DeclarationKind::StructField => {
            // Fields reject function-oriented meta.
            push(&mut violations, "export", meta.export);
            push(&mut violations, "flags", meta.flags);
            push(
                &mut violations,
                "explicit_init_functor",
                meta.explicit_init.is_some(),
            );
            push(
                &mut violations,
                "explicit_shutdown_functor",
                meta.explicit_shutdown.is_some(),
            );
        }
        DeclarationKind::Function => {
            // Functions reject struct-oriented meta.
            push(&mut violations, "flags", meta.flags);
            push(
                &mut violations,
                "explicit_init_functor",
                meta.explicit_init.is_some(),
            );
            push(
                &mut violations,
                "explicit_shutdown_functor",
                meta.explicit_shutdown.is_some(),
            );
            push(&mut violations, "size_field", meta.size_field.is_some());
            push(
                &mut violations,
                "visibility_condition_field",
                meta.visibility_condition_field.is_some(),
            );
            push(
                &mut violations,
                "dynamic_array_type",
                meta.dynamic_array_type.is_some(),
            );
        }
        DeclarationKind::FunctionArgument => {
            if !meta.is_empty() {
                violations.push("any meta on a function argument");
            }
        }
        DeclarationKind::Symbol => {
            push(&mut violations, "flags", meta.flags);
            push(
                &mut violations,
                "explicit_init_functor",
                meta.explicit_init.is_some(),
            );
            push(
                &mut violations,
                "explicit_shutdown_functor",
                meta.explicit_shutdown.is_some(),
            );
            push(&mut violations, "size_field", meta.size_field.is_some());
            push(
                &mut violations,
                "visibility_condition_field",
                meta.visibility_condition_field.is_some(),
            );
        }
    }

    if let Some(first) = violations.first() {
        return Err(Diagnostic::new(
            path,
            line,
            column,
            format!("incompatible meta combination: {first} is not permitted here"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_value_rejects_export() {
        let mut m = MetaStore::new();
        m.export = true;
        let err = check_compatible(DeclarationKind::EnumValue, &m, "f.h", 1, 1).unwrap_err();
        assert!(err.message.contains("export"));
    }

    #[test]
    fn enum_value_accepts_only_ignore() {
        let mut m = MetaStore::new();
        m.ignore = true;
        assert!(check_compatible(DeclarationKind::EnumValue, &m, "f.h", 1, 1).is_ok());
    }

    #[test]
    fn struct_field_rejects_function_meta() {
        let mut m = MetaStore::new();
        m.export = true;
        let err = check_compatible(DeclarationKind::StructField, &m, "f.h", 1, 1).unwrap_err();
        assert!(err.message.contains("export"));
    }

    #[test]
    fn function_rejects_struct_meta() {
        let mut m = MetaStore::new();
        m.size_field = Some("len".to_string());
        let err = check_compatible(DeclarationKind::Function, &m, "f.h", 1, 1).unwrap_err();
        assert!(err.message.contains("size_field"));
    }

    #[test]
    fn typedef_rejects_any_meta() {
        let mut m = MetaStore::new();
        m.ignore = true;
        assert!(check_compatible(DeclarationKind::Typedef, &m, "f.h", 1, 1).is_err());
    }
}
