//! The state machine that drives one input file through the lexer,
//! tracks which target file we're currently attributed to, and feeds
//! finished declarations to [`Sections`].
//!
//! A cursor over tokens with small lookahead, run single-pass:
//! there's no intermediate AST, since a declaration is fully consumed
//! and either copied through or turned into registrar code the moment
//! its closing `;`/`}` is seen.

use crate::archetype::{inline_array_archetype, select_field_archetype, Archetype};
use crate::config::ReflectionConfig;
use crate::lexer::{Lexer, Token};
use crate::meta::{check_compatible, DeclarationKind, MetaStore, SecondaryLevelMetaKind, TopLevelMetaKind};
use crate::sections::Sections;
use crate::target::{IncludedFiles, TargetKind, TargetList};
use crate::typeinfo::{TypeGroup, TypeInfo};
use kan_codegen_core::{normalize_path, Diagnostic};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
struct Attribution {
    in_target: bool,
    kind: Option<TargetKind>,
}

pub struct Parser<'a, R> {
    lexer: Lexer<R>,
    targets: &'a mut TargetList,
    included: &'a mut IncludedFiles,
    input_index: usize,
    config: &'a ReflectionConfig,
    sections: &'a mut Sections,
    meta: MetaStore,
    current_path: String,
    line_bias: i64,
    attribution: Attribution,
}

impl<'a, R: Read> Parser<'a, R> {
    pub fn new(
        source: R,
        input_path: &str,
        input_index: usize,
        targets: &'a mut TargetList,
        included: &'a mut IncludedFiles,
        config: &'a ReflectionConfig,
        sections: &'a mut Sections,
    ) -> Self {
        Parser {
            lexer: Lexer::new(source),
            targets,
            included,
            input_index,
            config,
            sections,
            meta: MetaStore::new(),
            current_path: normalize_path(input_path),
            line_bias: 0,
            attribution: Attribution::default(),
        }
    }

    /// Consume the whole input stream, mutating `sections` as
    /// declarations complete. Returns once the lexer is exhausted.
    pub fn run(&mut self) -> Result<(), Diagnostic> {
        loop {
            let Some(tok) = self.lexer.peek().cloned() else {
                break;
            };
            if tok == "#" {
                self.handle_hash_directive()?;
                continue;
            }
            if tok.text == "__pragma" {
                self.handle_dunder_pragma()?;
                continue;
            }
            if !self.attribution.in_target {
                self.lexer.next();
                continue;
            }
            match tok.text.as_str() {
                "typedef" => self.parse_typedef()?,
                "enum" => self.parse_enum()?,
                "struct" => self.parse_struct()?,
                _ => self.parse_function_or_symbol()?,
            }
        }
        if !self.meta.is_empty() {
            return Err(self.diag("unconsumed meta pragma at end of file"));
        }
        Ok(())
    }

    /// Drain any `#line`/`#pragma`/`__pragma(...)` directives sitting in
    /// front of the cursor. Called at every point inside a declaration
    /// body where real source could instead be a pragma feeding the next
    /// field/value/argument its meta.
    fn consume_directives(&mut self) -> Result<(), Diagnostic> {
        loop {
            match self.lexer.peek() {
                Some(t) if t.text == "#" => self.handle_hash_directive()?,
                Some(t) if t.text == "__pragma" => self.handle_dunder_pragma()?,
                _ => return Ok(()),
            }
        }
    }

    // ---- location / diagnostics -----------------------------------

    fn biased_line(&self) -> u32 {
        (self.lexer.line() as i64 + self.line_bias).max(1) as u32
    }

    fn diag(&self, message: impl Into<String>) -> Diagnostic {
        Diagnostic::new(&self.current_path, self.biased_line(), self.lexer.column(), message)
    }

    fn diag_at(&self, tok: &Token, message: impl Into<String>) -> Diagnostic {
        let line = (tok.line as i64 + self.line_bias).max(1) as u32;
        Diagnostic::new(&self.current_path, line, tok.column, message)
    }

    // ---- directives --------------------------------------------------

    /// `# N "path" flags...` or `#line N "path"`; anything else starting
    /// with `#` that we don't recognize is silently consumed.
    fn handle_hash_directive(&mut self) -> Result<(), Diagnostic> {
        let start_line = self.lexer.next().unwrap().line; // consume '#'
        let rest = self.read_rest_of_line(start_line);
        if rest.is_empty() {
            return Ok(());
        }
        if rest[0] == "line" {
            self.apply_line_directive(&rest[1..])?;
        } else if rest[0].text.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            self.apply_line_directive(&rest)?;
        } else if rest[0] == "pragma" {
            self.consume_pragma_body(&rest[1..])?;
        }
        // else: unrelated directive, drop silently.
        Ok(())
    }

    /// `__pragma ( ... )`, balancing nested parens so `warning (push, N)`
    /// inside it is captured whole.
    fn handle_dunder_pragma(&mut self) -> Result<(), Diagnostic> {
        self.lexer.next(); // __pragma
        let open = self.lexer.next();
        if open.as_ref().map(|t| t.text.as_str()) != Some("(") {
            return Err(self.diag("expected '(' after __pragma"));
        }
        let mut depth = 1i32;
        let mut body = Vec::new();
        loop {
            let Some(t) = self.lexer.next() else {
                return Err(self.diag("unterminated __pragma(...)"));
            };
            match t.text.as_str() {
                "(" => depth += 1,
                ")" => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
            body.push(t);
        }
        self.consume_pragma_body(&body)
    }

    fn read_rest_of_line(&mut self, line: u32) -> Vec<Token> {
        let mut out = Vec::new();
        while let Some(t) = self.lexer.peek() {
            if t.line != line {
                break;
            }
            out.push(self.lexer.next().unwrap());
        }
        out
    }

    /// `N "path" [flags...]`, the GCC line-marker form, and `#line N
    /// "path"` share this tail shape.
    fn apply_line_directive(&mut self, tail: &[Token]) -> Result<(), Diagnostic> {
        let Some(num_tok) = tail.first() else {
            return Err(self.diag("malformed line directive"));
        };
        let new_line: i64 = num_tok
            .text
            .parse()
            .map_err(|_| self.diag_at(num_tok, "malformed line number in line directive"))?;
        let new_path = tail.get(1).map(|t| t.text.trim_matches('"').to_string());

        let physical_next = self.lexer.line() as i64 + 1;
        self.line_bias = new_line - physical_next;
        if let Some(p) = new_path {
            self.current_path = normalize_path(&p);
        }

        let was = self.attribution;
        let attributed = self.targets.attribute(&self.current_path, self.input_index);
        self.attribution = match attributed {
            Some((kind, true)) => Attribution { in_target: true, kind: Some(kind) },
            Some((kind, false)) => Attribution { in_target: false, kind: Some(kind) },
            None => Attribution { in_target: false, kind: None },
        };

        if !was.in_target && self.attribution.in_target && self.attribution.kind == Some(TargetKind::Header) {
            self.maybe_emit_include(&self.current_path.clone());
        }
        if was.in_target && was.kind == Some(TargetKind::Object) && !self.attribution.in_target {
            self.maybe_emit_include(&self.current_path.clone());
        }
        Ok(())
    }

    fn maybe_emit_include(&mut self, path: &str) {
        if self.included.insert(path) && Path::new(path).is_file() {
            self.sections.declaration.push_str(&format!("#include \"{path}\"\n"));
        }
    }

    /// A pragma body is the tokens after `pragma` (line form) or between
    /// the outer parens of `__pragma(...)`. Either way it's a flat token
    /// list we interpret uniformly.
    fn consume_pragma_body(&mut self, body: &[Token]) -> Result<(), Diagnostic> {
        let Some(head) = body.first() else { return Ok(()) };
        if head.text == "warning" {
            return Ok(()); // `warning (push, N)` / `warning (pop)`, consumed.
        }
        if !head.text.starts_with("kan_") {
            return Ok(()); // unrelated pragma (`once`, `pack`, ...), consumed.
        }
        let args = &body[1..];
        let arg_text = |i: usize| args.get(i).map(|t| t.text.as_str());

        macro_rules! dup_check {
            ($already:expr, $name:literal) => {
                if $already {
                    return Err(self.diag_at(head, concat!("duplicate ", $name, " marker")));
                }
            };
        }

        match head.text.as_str() {
            "kan_export" => {
                dup_check!(self.meta.export, "kan_export");
                self.meta.export = true;
            }
            "kan_reflection_flags" => {
                dup_check!(self.meta.flags, "kan_reflection_flags");
                self.meta.flags = true;
            }
            "kan_reflection_ignore" => {
                dup_check!(self.meta.ignore, "kan_reflection_ignore");
                self.meta.ignore = true;
            }
            "kan_reflection_external_pointer" => {
                dup_check!(self.meta.external_pointer, "kan_reflection_external_pointer");
                self.meta.external_pointer = true;
            }
            "kan_reflection_explicit_init_functor" => {
                dup_check!(self.meta.explicit_init.is_some(), "kan_reflection_explicit_init_functor");
                let name = arg_text(0)
                    .ok_or_else(|| self.diag_at(head, "kan_reflection_explicit_init_functor requires a name"))?;
                self.meta.explicit_init = Some(name.to_string());
            }
            "kan_reflection_explicit_shutdown_functor" => {
                dup_check!(self.meta.explicit_shutdown.is_some(), "kan_reflection_explicit_shutdown_functor");
                let name = arg_text(0).ok_or_else(|| {
                    self.diag_at(head, "kan_reflection_explicit_shutdown_functor requires a name")
                })?;
                self.meta.explicit_shutdown = Some(name.to_string());
            }
            "kan_reflection_dynamic_array_type" => {
                dup_check!(self.meta.dynamic_array_type.is_some(), "kan_reflection_dynamic_array_type");
                let strs: Vec<&str> = args.iter().map(|t| t.text.as_str()).collect();
                let (ty, _) = TypeInfo::parse(&strs)
                    .ok_or_else(|| self.diag_at(head, "malformed kan_reflection_dynamic_array_type"))?;
                self.meta.dynamic_array_type = Some(ty);
            }
            "kan_reflection_size_field" => {
                dup_check!(self.meta.size_field.is_some(), "kan_reflection_size_field");
                let name = arg_text(0)
                    .ok_or_else(|| self.diag_at(head, "kan_reflection_size_field requires a field name"))?;
                self.meta.size_field = Some(name.to_string());
            }
            "kan_reflection_visibility_condition_field" => {
                dup_check!(
                    self.meta.visibility_condition_field.is_some(),
                    "kan_reflection_visibility_condition_field"
                );
                let name = arg_text(0).ok_or_else(|| {
                    self.diag_at(head, "kan_reflection_visibility_condition_field requires a field name")
                })?;
                self.meta.visibility_condition_field = Some(name.to_string());
            }
            "kan_reflection_visibility_condition_value" => {
                let value = arg_text(0).ok_or_else(|| {
                    self.diag_at(head, "kan_reflection_visibility_condition_value requires a value")
                })?;
                self.meta
                    .visibility_condition_values
                    .push(crate::meta::VisibilityConditionValue(value.to_string()));
            }
            "kan_reflection_enum_meta" | "kan_reflection_struct_meta" | "kan_reflection_function_meta" => {
                let target = arg_text(0).ok_or_else(|| self.diag_at(head, "meta pragma requires a name"))?;
                let kind = match head.text.as_str() {
                    "kan_reflection_enum_meta" => TopLevelMetaKind::Enum,
                    "kan_reflection_struct_meta" => TopLevelMetaKind::Struct,
                    _ => TopLevelMetaKind::Function,
                };
                self.meta.top_level.push(crate::meta::TopLevelMeta {
                    kind,
                    target_name: target.to_string(),
                });
            }
            "kan_reflection_enum_value_meta"
            | "kan_reflection_struct_field_meta"
            | "kan_reflection_function_argument_meta" => {
                let top = arg_text(0).ok_or_else(|| self.diag_at(head, "meta pragma requires two names"))?;
                let secondary = arg_text(1).ok_or_else(|| self.diag_at(head, "meta pragma requires two names"))?;
                let kind = match head.text.as_str() {
                    "kan_reflection_enum_value_meta" => SecondaryLevelMetaKind::EnumValue,
                    "kan_reflection_struct_field_meta" => SecondaryLevelMetaKind::StructField,
                    _ => SecondaryLevelMetaKind::FunctionArgument,
                };
                self.meta.secondary_level.push(crate::meta::SecondaryLevelMeta {
                    kind,
                    top_name: top.to_string(),
                    secondary_name: secondary.to_string(),
                });
            }
            other => {
                return Err(self.diag_at(head, format!("unknown marker '{other}' inside pragma brackets")));
            }
        }
        Ok(())
    }

    // ---- declarator parsing -------------------------------------------

    fn peek_text(&mut self) -> Option<String> {
        self.lexer.peek().map(|t| t.text.clone())
    }

    fn expect(&mut self, want: &str) -> Result<Token, Diagnostic> {
        match self.lexer.next() {
            Some(t) if t == want => Ok(t),
            Some(t) => Err(self.diag_at(&t, format!("expected '{want}', found '{}'", t.text))),
            None => Err(self.diag(format!("expected '{want}', found end of file"))),
        }
    }

    fn expect_identifier(&mut self) -> Result<Token, Diagnostic> {
        match self.lexer.next() {
            Some(t) if t.text.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_') => Ok(t),
            Some(t) => Err(self.diag_at(&t, format!("expected identifier, found '{}'", t.text))),
            None => Err(self.diag("expected identifier, found end of file")),
        }
    }

    /// `[const] [struct|enum] [const] NAME (* [const])* NAME2`, returning
    /// the parsed base type and the declarator name that follows it.
    fn parse_type_and_declarator(&mut self) -> Result<(TypeInfo, Token), Diagnostic> {
        let mut is_const = false;
        while self.peek_text().as_deref() == Some("const") {
            self.lexer.next();
            is_const = true;
        }
        let group = match self.peek_text().as_deref() {
            Some("struct") => {
                self.lexer.next();
                TypeGroup::Struct
            }
            Some("enum") => {
                self.lexer.next();
                TypeGroup::Enum
            }
            _ => TypeGroup::Value,
        };
        while self.peek_text().as_deref() == Some("const") {
            self.lexer.next();
            is_const = true;
        }
        let base_name = self.expect_identifier()?;
        let mut pointer_level: u8 = 0;
        while self.peek_text().as_deref() == Some("*") {
            self.lexer.next();
            pointer_level = pointer_level.saturating_add(1);
            while self.peek_text().as_deref() == Some("const") {
                self.lexer.next();
            }
        }
        let declarator = self.expect_identifier()?;
        Ok((
            TypeInfo {
                name: base_name.text,
                group,
                is_const,
                pointer_level,
            },
            declarator,
        ))
    }

    /// Skip balanced `()[]{}` nested content up to the next top-level
    /// `;`, used for array-size expressions and `= initializer`.
    fn skip_balanced_until_semicolon(&mut self) -> Result<Vec<Token>, Diagnostic> {
        let mut depth = 0i32;
        let mut out = Vec::new();
        loop {
            let Some(t) = self.lexer.next() else {
                return Err(self.diag("unexpected end of file"));
            };
            match t.text.as_str() {
                "(" | "[" | "{" => depth += 1,
                ")" | "]" | "}" => depth -= 1,
                ";" if depth == 0 => return Ok(out),
                _ => {}
            }
            out.push(t);
        }
    }

    fn render_tokens(tokens: &[Token]) -> String {
        let mut out = String::new();
        for (i, t) in tokens.iter().enumerate() {
            if i > 0 {
                let prev = &tokens[i - 1].text;
                let tight_before = matches!(t.text.as_str(), ";" | "," | ")" | "]");
                let tight_after = matches!(prev.as_str(), "(" | "[");
                if !tight_before && !tight_after {
                    out.push(' ');
                }
            }
            out.push_str(&t.text);
        }
        out
    }

    // ---- top-level declarations ----------------------------------------

    fn parse_typedef(&mut self) -> Result<(), Diagnostic> {
        let start = self.lexer.next().unwrap(); // 'typedef'
        let mut tokens = vec![start.clone()];
        loop {
            let t = self.lexer.next().ok_or_else(|| self.diag("unterminated typedef"))?;
            let done = t.text == ";";
            tokens.push(t);
            if done {
                break;
            }
        }
        check_compatible(DeclarationKind::Typedef, &self.meta, &self.current_path, start.line, start.column)?;
        self.sections.declaration.push_str(&Self::render_tokens(&tokens));
        self.sections.declaration.push('\n');
        self.meta.reset();
        Ok(())
    }

    fn parse_enum(&mut self) -> Result<(), Diagnostic> {
        let kw = self.lexer.next().unwrap();
        let name = self.expect_identifier()?;
        self.expect("{")?;

        check_compatible(DeclarationKind::Enum, &self.meta, &self.current_path, kw.line, kw.column)?;
        let enum_meta = std::mem::replace(&mut self.meta, MetaStore::new());

        self.sections.declaration.push_str(&format!("enum {} {{\n", name.text));

        let mut values: Vec<(String, bool)> = Vec::new();
        loop {
            self.consume_directives()?;
            if self.peek_text().as_deref() == Some("}") {
                self.lexer.next();
                break;
            }
            let value_name = self.expect_identifier()?;

            let mut explicit_value: Option<Vec<Token>> = None;
            if self.peek_text().as_deref() == Some("=") {
                self.lexer.next();
                let mut extra = Vec::new();
                loop {
                    match self.peek_text().as_deref() {
                        Some(",") | Some("}") => break,
                        Some(_) => extra.push(self.lexer.next().unwrap()),
                        None => return Err(self.diag("unterminated enum value")),
                    }
                }
                explicit_value = Some(extra);
            }
            let is_last = self.peek_text().as_deref() == Some("}");
            if self.peek_text().as_deref() == Some(",") {
                self.lexer.next();
            }

            match &explicit_value {
                Some(expr) => self.sections.declaration.push_str(&format!(
                    "    {} = {}{}\n",
                    value_name.text,
                    Self::render_tokens(expr),
                    if is_last { "" } else { "," }
                )),
                None => self
                    .sections
                    .declaration
                    .push_str(&format!("    {}{}\n", value_name.text, if is_last { "" } else { "," })),
            }

            check_compatible(
                DeclarationKind::EnumValue,
                &self.meta,
                &self.current_path,
                value_name.line,
                value_name.column,
            )?;
            values.push((value_name.text.clone(), self.meta.ignore));
            self.meta.reset();

            if is_last {
                self.expect("}")?;
                break;
            }
        }
        self.expect(";")?;
        self.finish_enum(&name.text, enum_meta, values)
    }

    fn finish_enum(&mut self, name: &str, top_meta: MetaStore, values: Vec<(String, bool)>) -> Result<(), Diagnostic> {
        self.sections.declaration.push_str("};\n\n");
        let is_flags = top_meta.flags;
        self.sections.bootstrap.push_str(&format!(
            "    kan_reflection_enum_meta_t {name}_meta = {{ .name = \"{name}\", .is_flags = {} }};\n",
            if is_flags { "KAN_TRUE" } else { "KAN_FALSE" }
        ));
        for (value_name, ignored) in &values {
            if *ignored {
                continue;
            }
            self.sections.bootstrap.push_str(&format!(
                "    kan_reflection_enum_value_meta_t {name}_{value_name}_meta = {{ .value = {value_name} }};\n"
            ));
        }
        self.sections.registrar.push_str(&format!(
            "    kan_reflection_registry_add_enum (registry, &{name}_meta);\n"
        ));
        let _ = top_meta; // consumed above; kept for clarity of ownership transfer.
        Ok(())
    }

    fn parse_struct(&mut self) -> Result<(), Diagnostic> {
        let kw = self.lexer.next().unwrap();
        let name = self.expect_identifier()?;
        self.expect("{")?;
        check_compatible(DeclarationKind::Struct, &self.meta, &self.current_path, kw.line, kw.column)?;
        let struct_meta = std::mem::replace(&mut self.meta, MetaStore::new());

        self.sections.declaration.push_str(&format!("struct {} {{\n", name.text));

        let mut field_index_by_name: HashMap<String, usize> = HashMap::new();
        let mut fields: Vec<FieldRecord> = Vec::new();
        let mut condition_cache: HashMap<(usize, Vec<String>), String> = HashMap::new();

        loop {
            self.consume_directives()?;
            if self.peek_text().as_deref() == Some("}") {
                self.lexer.next();
                break;
            }
            if self.peek_text().as_deref() == Some("union") {
                self.lexer.next();
                self.expect("{")?;
                loop {
                    self.consume_directives()?;
                    if self.peek_text().as_deref() == Some("}") {
                        self.lexer.next();
                        break;
                    }
                    self.parse_struct_field(
                        &name.text,
                        &mut field_index_by_name,
                        &mut fields,
                        &mut condition_cache,
                    )?;
                }
                self.expect(";")?;
                continue;
            }
            self.parse_struct_field(&name.text, &mut field_index_by_name, &mut fields, &mut condition_cache)?;
        }
        self.expect(";")?;
        self.finish_struct(&name.text, struct_meta, fields)
    }

    fn parse_struct_field(
        &mut self,
        struct_name: &str,
        field_index_by_name: &mut HashMap<String, usize>,
        fields: &mut Vec<FieldRecord>,
        condition_cache: &mut HashMap<(usize, Vec<String>), String>,
    ) -> Result<(), Diagnostic> {
        let (type_info, field_name) = self.parse_type_and_declarator()?;
        let mut array_len: Option<Token> = None;
        if self.peek_text().as_deref() == Some("[") {
            self.lexer.next();
            let len_tok = self.lexer.next().ok_or_else(|| self.diag("unterminated array suffix"))?;
            self.expect("]")?;
            array_len = Some(len_tok);
        }
        self.expect(";")?;

        check_compatible(
            DeclarationKind::StructField,
            &self.meta,
            &self.current_path,
            field_name.line,
            field_name.column,
        )?;
        let field_meta = std::mem::replace(&mut self.meta, MetaStore::new());

        let element_archetype = select_field_archetype(
            &type_info,
            &field_meta,
            self.config,
            &self.current_path,
            field_name.line,
            field_name.column,
        )?;
        let archetype = if array_len.is_some() {
            inline_array_archetype(element_archetype, field_meta.size_field.clone())
        } else {
            element_archetype
        };

        let visibility_condition_field_index = match &field_meta.visibility_condition_field {
            Some(governing_name) => Some(*field_index_by_name.get(governing_name).ok_or_else(|| {
                self.diag_at(&field_name, format!("visibility condition field '{governing_name}' must be declared earlier"))
            })?),
            None => None,
        };

        let values: Vec<String> = field_meta
            .visibility_condition_values
            .iter()
            .map(|v| v.0.clone())
            .collect();
        let condition_symbol = if let Some(idx) = visibility_condition_field_index {
            let key = (idx, values.clone());
            if let Some(existing) = condition_cache.get(&key) {
                Some(existing.clone())
            } else {
                let symbol = format!("{struct_name}_{field_name}_visibility_values", field_name = field_name.text);
                self.sections.generation_control.push_str(&format!(
                    "static const uint32_t {symbol}[] = {{ {} }};\n",
                    values.join(", ")
                ));
                condition_cache.insert(key, symbol.clone());
                Some(symbol)
            }
        } else {
            None
        };

        let array_suffix = array_len
            .as_ref()
            .map(|t| format!("[{}]", t.text))
            .unwrap_or_default();
        self.sections.declaration.push_str(&format!(
            "    {}{} {}{};\n",
            if type_info.is_const { "const " } else { "" },
            Self::render_type_name(&type_info),
            field_name.text,
            array_suffix
        ));
        self.sections.generation_control.push_str(&format!(
            "#define {struct_name}_FIELD_{field}_INDEX {index}\n",
            field = field_name.text,
            index = fields.len()
        ));

        field_index_by_name.insert(field_name.text.clone(), fields.len());
        fields.push(FieldRecord {
            name: field_name.text.clone(),
            archetype,
            visibility_condition_field_index,
            condition_symbol,
        });
        Ok(())
    }

    fn render_type_name(type_info: &TypeInfo) -> String {
        let base = match type_info.group {
            TypeGroup::Struct => format!("struct {}", type_info.name),
            TypeGroup::Enum => format!("enum {}", type_info.name),
            TypeGroup::Value => type_info.name.clone(),
        };
        format!("{base}{}", " *".repeat(type_info.pointer_level as usize))
    }

    fn finish_struct(&mut self, name: &str, _top_meta: MetaStore, fields: Vec<FieldRecord>) -> Result<(), Diagnostic> {
        self.sections.declaration.push_str("};\n\n");
        self.sections.bootstrap.push_str(&format!(
            "    kan_reflection_struct_meta_t {name}_meta = {{ .name = \"{name}\", .size = sizeof (struct {name}), .alignment = _Alignof (struct {name}) }};\n"
        ));
        for field in &fields {
            self.sections.bootstrap.push_str(&format!(
                "    kan_reflection_field_meta_t {name}_{field}_meta = {{ .name = \"{field}\", .offset = offsetof (struct {name}, {field}), .archetype = {archetype} }};\n",
                field = field.name,
                archetype = field.archetype.describe(),
            ));
            if let (Some(idx), Some(symbol)) = (field.visibility_condition_field_index, &field.condition_symbol) {
                self.sections.bootstrap.push_str(&format!(
                    "    {name}_{field}_meta.visibility_condition_field_index = {idx};\n    {name}_{field}_meta.visibility_condition_values = {symbol};\n",
                    field = field.name,
                ));
            }
        }
        self.sections.registrar.push_str(&format!(
            "    kan_reflection_registry_add_struct (registry, &{name}_meta);\n"
        ));
        Ok(())
    }

    fn parse_function_or_symbol(&mut self) -> Result<(), Diagnostic> {
        let mut is_extern = false;
        let mut is_static = false;
        let mut is_inline = false;
        loop {
            match self.peek_text().as_deref() {
                Some("__declspec") => {
                    self.lexer.next();
                    self.expect("(")?;
                    while self.peek_text().as_deref() != Some(")") {
                        self.lexer.next().ok_or_else(|| self.diag("unterminated __declspec"))?;
                    }
                    self.lexer.next();
                }
                Some("extern") => {
                    self.lexer.next();
                    is_extern = true;
                }
                Some("static") => {
                    self.lexer.next();
                    is_static = true;
                }
                Some("inline") => {
                    self.lexer.next();
                    is_inline = true;
                }
                _ => break,
            }
        }
        let start_line = self.lexer.line();
        let start_col = self.lexer.column();
        let (type_info, declarator) = self.parse_type_and_declarator()?;

        if self.peek_text().as_deref() == Some("(") {
            self.parse_function(type_info, declarator, is_extern, is_static, is_inline)
        } else {
            if is_inline {
                return Err(self.diag("'inline' is not valid on a symbol declaration"));
            }
            let _ = (is_extern, is_static, start_line, start_col);
            self.parse_symbol(type_info, declarator)
        }
    }

    fn parse_function(
        &mut self,
        return_type: TypeInfo,
        name: Token,
        is_extern: bool,
        is_static: bool,
        is_inline: bool,
    ) -> Result<(), Diagnostic> {
        self.expect("(")?;
        let mut args: Vec<(TypeInfo, String)> = Vec::new();
        if self.peek_text().as_deref() != Some(")") {
            loop {
                self.consume_directives()?;
                let (arg_type, arg_name) = self.parse_type_and_declarator()?;
                check_compatible(
                    DeclarationKind::FunctionArgument,
                    &self.meta,
                    &self.current_path,
                    arg_name.line,
                    arg_name.column,
                )?;
                args.push((arg_type, arg_name.text));
                match self.peek_text().as_deref() {
                    Some(",") => {
                        self.lexer.next();
                    }
                    _ => break,
                }
            }
        }
        self.expect(")")?;

        check_compatible(DeclarationKind::Function, &self.meta, &self.current_path, name.line, name.column)?;
        let meta = std::mem::replace(&mut self.meta, MetaStore::new());

        // Function body or forward-declaration semicolon: consumed
        // verbatim either way, since the registrar only needs a
        // call-through wrapper, not the body itself.
        match self.lexer.next() {
            Some(t) if t.text == ";" => {}
            Some(t) if t.text == "{" => {
                let mut depth = 1i32;
                loop {
                    let b = self.lexer.next().ok_or_else(|| self.diag("unterminated function body"))?;
                    match b.text.as_str() {
                        "{" => depth += 1,
                        "}" => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                }
            }
            Some(t) => return Err(self.diag_at(&t, "expected ';' or '{' after function signature")),
            None => return Err(self.diag("unexpected end of file in function declaration")),
        }

        let qualifiers = [
            is_extern.then_some("extern"),
            is_static.then_some("static"),
            is_inline.then_some("inline"),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
        let arg_list = args
            .iter()
            .map(|(t, n)| format!("{} {}", Self::render_type_name(t), n))
            .collect::<Vec<_>>()
            .join(", ");
        self.sections.generated_functions.push_str(&format!(
            "{}{} {} ({});\n",
            if qualifiers.is_empty() { String::new() } else { format!("{qualifiers} ") },
            Self::render_type_name(&return_type),
            name.text,
            arg_list
        ));

        if let Some(init) = &meta.explicit_init {
            self.sections.bootstrap.push_str(&format!(
                "    kan_reflection_struct_meta.init_functor = {init};\n"
            ));
        }
        if let Some(shutdown) = &meta.explicit_shutdown {
            self.sections.bootstrap.push_str(&format!(
                "    kan_reflection_struct_meta.shutdown_functor = {shutdown};\n"
            ));
        }
        if meta.export {
            self.sections.registrar.push_str(&format!(
                "    kan_reflection_registry_add_function (registry, \"{}\", &{});\n",
                name.text, name.text
            ));
        }
        Ok(())
    }

    fn parse_symbol(&mut self, type_info: TypeInfo, name: Token) -> Result<(), Diagnostic> {
        if self.peek_text().as_deref() == Some("[") {
            self.lexer.next();
            self.lexer.next(); // length expression token (narrow subset: single token)
            self.expect("]")?;
        }
        if self.peek_text().as_deref() == Some("=") {
            self.lexer.next();
            self.skip_balanced_until_semicolon()?;
        } else {
            self.expect(";")?;
        }

        check_compatible(DeclarationKind::Symbol, &self.meta, &self.current_path, name.line, name.column)?;
        let meta = std::mem::replace(&mut self.meta, MetaStore::new());

        if meta.export {
            if type_info.group != TypeGroup::Struct || type_info.pointer_level != 0 {
                return Err(self.diag_at(&name, "kan_export on a symbol is only valid for struct-typed symbols"));
            }
            self.sections.generated_symbols.push_str(&format!(
                "extern struct {} {};\n",
                type_info.name, name.text
            ));
            self.sections.registrar.push_str(&format!(
                "    kan_reflection_registry_add_symbol (registry, \"{}\", &{}, sizeof (struct {}));\n",
                name.text, name.text, type_info.name
            ));
        }
        Ok(())
    }
}

struct FieldRecord {
    name: String,
    archetype: Archetype,
    visibility_condition_field_index: Option<usize>,
    condition_symbol: Option<String>,
}

impl Archetype {
    fn describe(&self) -> &'static str {
        match self {
            Archetype::SignedInt => "KAN_REFLECTION_ARCHETYPE_SIGNED_INT",
            Archetype::UnsignedInt => "KAN_REFLECTION_ARCHETYPE_UNSIGNED_INT",
            Archetype::Floating => "KAN_REFLECTION_ARCHETYPE_FLOATING",
            Archetype::StringPointer => "KAN_REFLECTION_ARCHETYPE_STRING_POINTER",
            Archetype::ExternalPointer => "KAN_REFLECTION_ARCHETYPE_EXTERNAL_POINTER",
            Archetype::StructPointer(_) => "KAN_REFLECTION_ARCHETYPE_STRUCT_POINTER",
            Archetype::InternedString => "KAN_REFLECTION_ARCHETYPE_INTERNED_STRING",
            Archetype::Patch => "KAN_REFLECTION_ARCHETYPE_PATCH",
            Archetype::DynamicArray(_) => "KAN_REFLECTION_ARCHETYPE_DYNAMIC_ARRAY",
            Archetype::Struct(_) => "KAN_REFLECTION_ARCHETYPE_STRUCT",
            Archetype::InlineArray { .. } => "KAN_REFLECTION_ARCHETYPE_INLINE_ARRAY",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn run_source(source: &str, target_paths: &[&str]) -> (Sections, Result<(), Diagnostic>) {
        let mut target_file = tempfile::NamedTempFile::new().unwrap();
        for p in target_paths {
            writeln!(target_file, "{p}").unwrap();
        }
        let mut targets = TargetList::load(target_file.path()).unwrap();
        let mut included = IncludedFiles::new();
        let config = ReflectionConfig::default_table();
        let mut sections = Sections::new();
        let full_source = format!(
            "# 1 \"{}\"\n{}",
            target_paths.first().copied().unwrap_or("in.c"),
            source
        );
        let result = {
            let mut parser = Parser::new(
                std::io::Cursor::new(full_source.into_bytes()),
                "in.c",
                0,
                &mut targets,
                &mut included,
                &config,
                &mut sections,
            );
            parser.run()
        };
        (sections, result)
    }

    #[test]
    fn plain_struct_with_export_produces_registrar_entry() {
        let (sections, result) = run_source(
            "#pragma kan_export\nstruct point_t {\n    int32_t x;\n    int32_t y;\n};\n",
            &["foo.h"],
        );
        result.unwrap();
        assert!(sections.declaration.contains("struct point_t {"));
        assert!(sections.registrar.contains("kan_reflection_registry_add_struct"));
        assert!(sections.bootstrap.contains("offsetof (struct point_t, x)"));
    }

    #[test]
    fn enum_with_flags_meta_is_recorded() {
        let (sections, result) = run_source(
            "#pragma kan_reflection_flags\nenum color_t {\n    COLOR_RED,\n    COLOR_GREEN,\n};\n",
            &["foo.h"],
        );
        result.unwrap();
        assert!(sections.bootstrap.contains("is_flags = KAN_TRUE"));
    }

    #[test]
    fn enum_value_ignore_meta_skips_value_meta_emission() {
        let (sections, result) = run_source(
            "enum color_t {\n    COLOR_RED,\n#pragma kan_reflection_ignore\n    COLOR_INTERNAL,\n};\n",
            &["foo.h"],
        );
        result.unwrap();
        assert!(sections.bootstrap.contains("color_t_COLOR_RED_meta"));
        assert!(!sections.bootstrap.contains("color_t_COLOR_INTERNAL_meta"));
    }

    #[test]
    fn content_outside_any_target_file_is_dropped() {
        let (sections, result) = run_source("struct not_a_target_t {\n    int32_t x;\n};\n", &["other.h"]);
        result.unwrap();
        assert!(sections.declaration.is_empty());
    }

    #[test]
    fn unknown_kan_marker_is_a_fatal_error() {
        let (_sections, result) = run_source("#pragma kan_reflection_bogus_marker\n", &["foo.h"]);
        assert!(result.is_err());
    }

    #[test]
    fn typedef_with_meta_attached_is_rejected() {
        let (_sections, result) = run_source("#pragma kan_export\ntypedef int32_t kan_id_t;\n", &["foo.h"]);
        assert!(result.is_err());
    }

    #[test]
    fn duplicate_export_marker_is_an_error() {
        let (_sections, result) = run_source(
            "#pragma kan_export\n#pragma kan_export\nstruct s_t {\n    int32_t x;\n};\n",
            &["foo.h"],
        );
        assert!(result.is_err());
    }

    #[test]
    fn visibility_condition_fields_generate_a_shared_values_array() {
        let (sections, result) = run_source(
            "struct variant_t {\n    uint32_t tag;\n#pragma kan_reflection_visibility_condition_field tag\n#pragma kan_reflection_visibility_condition_value 0\n    uint32_t as_int;\n};\n",
            &["foo.h"],
        );
        result.unwrap();
        assert!(sections.generation_control.contains("visibility_values[] = { 0 }"));
    }
}
