//! Parsed representation of a C type reference: `const struct Foo **`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeGroup {
    Value,
    Enum,
    Struct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    pub name: String,
    pub group: TypeGroup,
    pub is_const: bool,
    pub pointer_level: u8,
}

impl TypeInfo {
    pub fn new(name: impl Into<String>, group: TypeGroup) -> Self {
        TypeInfo {
            name: name.into(),
            group,
            is_const: false,
            pointer_level: 0,
        }
    }

    /// Parse a type reference from a flat token list, e.g.
    /// `["const", "struct", "Foo", "*", "*"]`. Consumes exactly the tokens
    /// that make up the type and returns how many were used, so the caller
    /// can keep parsing the declarator (name, array suffix, ...).
    pub fn parse(tokens: &[&str]) -> Option<(TypeInfo, usize)> {
        let mut i = 0;
        let mut is_const = false;
        while tokens.get(i) == Some(&"const") {
            is_const = true;
            i += 1;
        }
        let group = match tokens.get(i) {
            Some(&"struct") => {
                i += 1;
                TypeGroup::Struct
            }
            Some(&"enum") => {
                i += 1;
                TypeGroup::Enum
            }
            _ => TypeGroup::Value,
        };
        while tokens.get(i) == Some(&"const") {
            is_const = true;
            i += 1;
        }
        let name = (*tokens.get(i)?).to_string();
        i += 1;
        let mut pointer_level: u8 = 0;
        while tokens.get(i) == Some(&"*") {
            pointer_level = pointer_level.saturating_add(1);
            i += 1;
            // A `const` between stars qualifies the pointer, not the
            // pointee; we don't track per-level constness, only whether
            // the base type was declared const, matching the archetype
            // rules which only ever ask "is this const at all".
            while tokens.get(i) == Some(&"const") {
                i += 1;
            }
        }
        Some((
            TypeInfo {
                name,
                group,
                is_const,
                pointer_level,
            },
            i,
        ))
    }

    pub fn is_char_pointer(&self, level: u8) -> bool {
        self.group == TypeGroup::Value && self.name == "char" && self.pointer_level == level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_scalar() {
        let (t, used) = TypeInfo::parse(&["int", "x"]).unwrap();
        assert_eq!(t.name, "int");
        assert_eq!(t.group, TypeGroup::Value);
        assert_eq!(t.pointer_level, 0);
        assert_eq!(used, 1);
    }

    #[test]
    fn parses_const_struct_double_pointer() {
        let (t, used) = TypeInfo::parse(&["const", "struct", "Foo", "*", "*", "name"]).unwrap();
        assert_eq!(t.name, "Foo");
        assert_eq!(t.group, TypeGroup::Struct);
        assert!(t.is_const);
        assert_eq!(t.pointer_level, 2);
        assert_eq!(used, 5);
    }

    #[test]
    fn parses_enum_type() {
        let (t, _) = TypeInfo::parse(&["enum", "Color", "c"]).unwrap();
        assert_eq!(t.group, TypeGroup::Enum);
        assert_eq!(t.name, "Color");
    }

    #[test]
    fn char_pointer_level_one_is_detected() {
        let (t, _) = TypeInfo::parse(&["char", "*", "s"]).unwrap();
        assert!(t.is_char_pointer(1));
        assert!(!t.is_char_pointer(2));
    }
}
