//! The shared two-pass walker (§4.2.1). `scan()` and `emit()` both
//! drive [`Walker::run`]; only `is_output_phase` and whether bytes get
//! copied to an output buffer differ, so both passes reach identical
//! error positions on malformed input.

use crate::macros::{self, ArgShape, QueryKind, QueryMode};
use crate::state::{require_state, ScannedState, UniverseStates};
use crate::{mangle, error::UniverseError};
use kan_codegen_core::{ByteScanner, Diagnostic};
use std::io::Read;

#[derive(Debug, Clone)]
struct QueryStackNode {
    blocks_at_open: u32,
    field_name: String,
    type_name: String,
    kind: QueryKind,
    mode: QueryMode,
}

#[derive(Debug, Default)]
struct ProcessState {
    bound_state_name: Option<String>,
    bound_state_path: Option<String>,
    blocks: u32,
    stack: Vec<QueryStackNode>,
}

struct Word {
    text: String,
    line: u32,
    column: u32,
}

pub struct Walker<R> {
    scanner: ByteScanner<R>,
    path: String,
    is_output_phase: bool,
    process: ProcessState,
    expects_new_block: bool,
    output: String,
}

impl<R: Read> Walker<R> {
    fn new(source: R, path: &str, is_output_phase: bool) -> Self {
        Walker {
            scanner: ByteScanner::new(source),
            path: path.to_string(),
            is_output_phase,
            process: ProcessState::default(),
            expects_new_block: false,
            output: String::new(),
        }
    }

    /// Pass 1: discover query fields per state; emit nothing.
    pub fn scan(source: R, path: &str, states: &mut UniverseStates) -> Result<(), UniverseError> {
        let mut w = Walker::new(source, path, false);
        w.run(states).map_err(UniverseError::Scan)
    }

    /// Pass 2: re-walk identical bytes, this time producing output text.
    pub fn emit(source: R, path: &str, states: &mut UniverseStates) -> Result<String, UniverseError> {
        let mut w = Walker::new(source, path, true);
        w.run(states).map_err(UniverseError::Output)?;
        Ok(w.output)
    }

    fn diag(&self, line: u32, column: u32, message: impl Into<String>) -> Diagnostic {
        Diagnostic::new(&self.path, line, column, message)
    }

    fn run(&mut self, states: &mut UniverseStates) -> Result<(), Diagnostic> {
        loop {
            match self.next_word()? {
                None => break,
                Some(word) => {
                    if word.text.starts_with("KAN_UP_") {
                        self.dispatch_macro(&word, states)?;
                    } else if self.is_output_phase {
                        self.output.push_str(&word.text);
                    }
                }
            }
        }
        if self.process.blocks != 0 {
            return Err(self.diag(self.scanner.line(), self.scanner.column(), "unbalanced braces at end of file"));
        }
        Ok(())
    }

    /// Copies verbatim bytes (whitespace, comments, string/char
    /// literals, punctuation) until the next identifier, which is
    /// returned unclassified and uncommitted to the output. Braces are
    /// intercepted here since they drive block accounting regardless of
    /// whether the surrounding text came from a macro.
    fn next_word(&mut self) -> Result<Option<Word>, Diagnostic> {
        loop {
            let Some(b) = self.scanner.peek() else { return Ok(None) };
            if b.is_ascii_whitespace() {
                self.scanner.advance();
                if self.is_output_phase {
                    self.output.push(b as char);
                }
                continue;
            }
            if b == b'{' {
                self.scanner.advance();
                if self.is_output_phase {
                    self.output.push('{');
                }
                self.on_open_brace()?;
                continue;
            }
            if b == b'}' {
                let line = self.scanner.line();
                let column = self.scanner.column();
                self.scanner.advance();
                self.on_close_brace(line, column)?;
                if self.is_output_phase {
                    self.output.push('}');
                }
                continue;
            }
            if b == b'/' {
                self.copy_maybe_comment();
                continue;
            }
            if b == b'"' || b == b'\'' {
                self.copy_literal(b);
                continue;
            }
            if b.is_ascii_alphabetic() || b == b'_' {
                let line = self.scanner.line();
                let column = self.scanner.column();
                let mut text = String::new();
                while let Some(c) = self.scanner.peek() {
                    if c.is_ascii_alphanumeric() || c == b'_' {
                        text.push(self.scanner.advance().unwrap() as char);
                    } else {
                        break;
                    }
                }
                return Ok(Some(Word { text, line, column }));
            }
            self.scanner.advance();
            if self.is_output_phase {
                self.output.push(b as char);
            }
        }
    }

    fn copy_maybe_comment(&mut self) {
        let mark = self.scanner.mark();
        self.scanner.advance(); // '/'
        match self.scanner.peek() {
            Some(b'/') => {
                self.scanner.release(mark);
                while let Some(b) = self.scanner.peek() {
                    if self.is_output_phase {
                        self.output.push(b as char);
                    }
                    self.scanner.advance();
                    if b == b'\n' {
                        break;
                    }
                }
            }
            Some(b'*') => {
                self.scanner.release(mark);
                if self.is_output_phase {
                    self.output.push_str("/*");
                }
                self.scanner.advance();
                let mut prev = 0u8;
                while let Some(b) = self.scanner.advance() {
                    if self.is_output_phase {
                        self.output.push(b as char);
                    }
                    if prev == b'*' && b == b'/' {
                        break;
                    }
                    prev = b;
                }
            }
            _ => {
                self.scanner.restore(mark);
                self.scanner.advance();
                if self.is_output_phase {
                    self.output.push('/');
                }
            }
        }
    }

    fn copy_literal(&mut self, quote: u8) {
        if self.is_output_phase {
            self.output.push(quote as char);
        }
        self.scanner.advance();
        let mut escaped = false;
        while let Some(b) = self.scanner.advance() {
            if self.is_output_phase {
                self.output.push(b as char);
            }
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == quote || b == b'\n' {
                break;
            }
        }
    }

    fn on_open_brace(&mut self) -> Result<(), Diagnostic> {
        self.process.blocks += 1;
        self.expects_new_block = false;
        Ok(())
    }

    fn on_close_brace(&mut self, line: u32, column: u32) -> Result<(), Diagnostic> {
        if self.process.blocks == 0 {
            return Err(self.diag(line, column, "unmatched '}'"));
        }
        self.process.blocks -= 1;
        while let Some(top) = self.process.stack.last() {
            if top.blocks_at_open != self.process.blocks {
                break;
            }
            let node = self.process.stack.pop().unwrap();
            if self.is_output_phase {
                self.output.push_str(&self.close_boilerplate(&node));
            }
        }
        Ok(())
    }

    // ---- macro dispatch --------------------------------------------

    fn dispatch_macro(&mut self, word: &Word, states: &mut UniverseStates) -> Result<(), Diagnostic> {
        if word.text == "KAN_UP_GENERATE_STATE_QUERIES" {
            let args = self.read_call_args(word)?;
            let name = args.first().cloned().ok_or_else(|| {
                self.diag(word.line, word.column, "KAN_UP_GENERATE_STATE_QUERIES requires a state name")
            })?;
            if self.is_output_phase {
                let state = states
                    .get(&name)
                    .ok_or_else(|| self.diag(word.line, word.column, format!("unknown state '{name}'")))?;
                self.output.push_str(&render_state_queries(state, &self.path, word.line));
            } else {
                states.declare(&name, &self.path, word.line, word.column)?;
            }
            return Ok(());
        }

        if word.text == "KAN_UP_BIND_STATE" {
            let args = self.read_call_args(word)?;
            let name = args.first().cloned().unwrap_or_default();
            let path_expr = args.get(1).cloned().unwrap_or_default();
            if !self.is_output_phase && states.get(&name).is_none() {
                return Err(self.diag(word.line, word.column, format!("bind to unknown state '{name}'")));
            }
            self.process.bound_state_name = Some(name);
            self.process.bound_state_path = Some(path_expr);
            return Ok(());
        }

        if macros::CONTROL_MACROS.contains(&word.text.as_str()) {
            self.read_call_args(word)?;
            match word.text.as_str() {
                "KAN_UP_QUERY_BREAK" => self.close_one_and_emit("break;"),
                "KAN_UP_QUERY_CONTINUE" => self.close_one_and_emit("continue;"),
                "KAN_UP_QUERY_RETURN_VOID" => self.close_all_and_emit("return;"),
                "KAN_UP_MUTATOR_RETURN" => self.close_all_and_emit("kan_cpu_job_release (job);\nreturn;"),
                _ => unreachable!(),
            }
            return Ok(());
        }

        if word.text == "KAN_UP_QUERY_RETURN_VALUE" {
            let args = self.read_call_args(word)?;
            let ty = args.first().cloned().unwrap_or_default();
            let expr = args.get(1).cloned().unwrap_or_default();
            if self.is_output_phase {
                self.output.push_str(&format!("{ty} query_return_value = {expr};\n"));
            }
            self.close_all_and_emit("return query_return_value;");
            return Ok(());
        }

        if word.text == "KAN_UP_ACCESS_ESCAPE" {
            let args = self.read_call_args(word)?;
            let dst = args.first().cloned().unwrap_or_default();
            let n = args.get(1).cloned().unwrap_or_default();
            if self.is_output_phase {
                self.output.push_str(&format!("{dst} = {n}_access;\n{n}_access_expired = KAN_TRUE;\n"));
            }
            return Ok(());
        }

        if word.text == "KAN_UP_ACCESS_DELETE" {
            let args = self.read_call_args(word)?;
            let n = args.first().cloned().unwrap_or_default();
            if self.is_output_phase {
                let type_name = self
                    .process
                    .stack
                    .iter()
                    .rev()
                    .find(|node| node.field_name == n)
                    .map(|node| node.type_name.clone())
                    .unwrap_or_default();
                self.output.push_str(&format!(
                    "kan_repository_{type_name}_delete (&{n}_access);\n{n}_access_expired = KAN_TRUE;\n"
                ));
            }
            return Ok(());
        }

        if let Some(spec) = macros::lookup(&word.text) {
            return self.dispatch_query(word, spec, states);
        }

        // Not a recognized KAN_UP_ form: copy the identifier through
        // verbatim (it's ordinary source text, e.g. a user symbol that
        // merely starts with the same prefix).
        if self.is_output_phase {
            self.output.push_str(&word.text);
        }
        Ok(())
    }

    fn dispatch_query(
        &mut self,
        word: &Word,
        spec: &macros::QueryMacro,
        states: &mut UniverseStates,
    ) -> Result<(), Diagnostic> {
        if self.expects_new_block {
            return Err(self.diag(
                word.line,
                word.column,
                "a new query cannot open before the previous one's block starts",
            ));
        }
        let args = self.read_call_args(word)?;
        let field_name = args.first().cloned().unwrap_or_default();
        let type_name = args.get(1).cloned().unwrap_or_default();

        let mangled = match spec.shape {
            ArgShape::NameType => mangle::plain(spec.kind, spec.mode, &type_name),
            ArgShape::NameTypePath => mangle::value(spec.kind, spec.mode, &type_name, args.get(2).map(|s| s.as_str()).unwrap_or("")),
            ArgShape::NameTypePathLiteral => mangle::signal(
                spec.mode,
                &type_name,
                args.get(2).map(|s| s.as_str()).unwrap_or(""),
                args.get(3).map(|s| s.as_str()).unwrap_or("0"),
            ),
            ArgShape::NameTypePathRange => mangle::value(spec.kind, spec.mode, &type_name, args.get(2).map(|s| s.as_str()).unwrap_or("")),
        };
        let field_type = query_field_type(spec.kind, spec.mode);

        let bound_state = self
            .process
            .bound_state_name
            .clone()
            .ok_or_else(|| self.diag(word.line, word.column, "query used before any KAN_UP_BIND_STATE"))?;

        if !self.is_output_phase {
            let state = require_state(states, &bound_state, &self.path, word.line, word.column)
                .map_err(|e| match e {
                    UniverseError::Scan(d) => d,
                    _ => unreachable!(),
                })?;
            state.record(mangled.clone(), field_type.clone());
        } else {
            let state_path = self.process.bound_state_path.clone().unwrap_or_default();
            self.output.push_str(&open_boilerplate(spec.kind, spec.mode, &field_name, &type_name, &mangled, &state_path));
        }

        let iterates = macros::is_iteration(spec.kind, spec.mode);
        self.process.stack.push(QueryStackNode {
            blocks_at_open: self.process.blocks,
            field_name,
            type_name,
            kind: spec.kind,
            mode: spec.mode,
        });
        if iterates {
            self.expects_new_block = true;
        }
        Ok(())
    }

    fn close_one_and_emit(&mut self, tail: &str) {
        if let Some(node) = self.process.stack.pop() {
            if self.is_output_phase {
                self.output.push_str(&self.close_boilerplate(&node));
            }
        }
        if self.is_output_phase {
            self.output.push_str(tail);
            self.output.push('\n');
        }
    }

    fn close_all_and_emit(&mut self, tail: &str) {
        while let Some(node) = self.process.stack.pop() {
            if self.is_output_phase {
                self.output.push_str(&self.close_boilerplate(&node));
            }
        }
        if self.is_output_phase {
            self.output.push_str(tail);
            self.output.push('\n');
        }
    }

    fn close_boilerplate(&self, node: &QueryStackNode) -> String {
        if macros::is_iteration(node.kind, node.mode) {
            format!(
                "else\n{{\n    kan_repository_{mangled}_cursor_close (&{name}_cursor);\n    break;\n}}\n}}\n}}\n",
                mangled = mangle::plain(node.kind, node.mode, &node.type_name),
                name = node.field_name,
            )
        } else {
            match node.kind {
                QueryKind::IndexedInsert => format!(
                    "kan_repository_indexed_insertion_package_submit (&{name}_package);\n}}\n",
                    name = node.field_name
                ),
                QueryKind::Event if node.mode == QueryMode::Insert => format!(
                    "kan_repository_event_insertion_package_submit (&{name}_package);\n}}\n",
                    name = node.field_name
                ),
                _ => format!(
                    "kan_repository_{mangled}_access_close (&{name}_access);\n}}\n",
                    mangled = mangle::plain(node.kind, node.mode, &node.type_name),
                    name = node.field_name,
                ),
            }
        }
    }

    /// Reads `NAME ( ARG, ARG, ... )` and an optional trailing `;`,
    /// returning the raw argument texts (comma-split at depth 0).
    fn read_call_args(&mut self, _word: &Word) -> Result<Vec<String>, Diagnostic> {
        self.skip_spaces_and_comments();
        let Some(b'(') = self.scanner.peek() else {
            return Err(self.diag(self.scanner.line(), self.scanner.column(), "expected '(' after KAN_UP_ macro name"));
        };
        self.scanner.advance();
        let mut args = vec![String::new()];
        let mut depth = 1i32;
        loop {
            let Some(b) = self.scanner.advance() else {
                return Err(self.diag(self.scanner.line(), self.scanner.column(), "unterminated macro argument list"));
            };
            match b {
                b'(' | b'[' => {
                    depth += 1;
                    args.last_mut().unwrap().push(b as char);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    args.last_mut().unwrap().push(b as char);
                }
                b']' => {
                    depth -= 1;
                    args.last_mut().unwrap().push(b as char);
                }
                b',' if depth == 1 => args.push(String::new()),
                _ => args.last_mut().unwrap().push(b as char),
            }
        }
        self.skip_spaces_and_comments();
        if self.scanner.peek() == Some(b';') {
            self.scanner.advance();
        }
        Ok(args.into_iter().map(|a| a.trim().to_string()).filter(|a| !a.is_empty()).collect())
    }

    fn skip_spaces_and_comments(&mut self) {
        while let Some(b) = self.scanner.peek() {
            if b.is_ascii_whitespace() {
                self.scanner.advance();
            } else {
                break;
            }
        }
    }
}

fn query_field_type(kind: QueryKind, mode: QueryMode) -> String {
    let kind_word = match kind {
        QueryKind::Singleton => "singleton",
        QueryKind::IndexedInsert => "indexed_insertion",
        QueryKind::Sequence => "sequence",
        QueryKind::Value => "value",
        QueryKind::Signal => "signal",
        QueryKind::IntervalAsc => "interval_ascending",
        QueryKind::IntervalDesc => "interval_descending",
        QueryKind::Event => "event",
    };
    let mode_word = match mode {
        QueryMode::Read => "read",
        QueryMode::Write => "write",
        QueryMode::Update => "update",
        QueryMode::Delete => "delete",
        QueryMode::Insert => "insert",
        QueryMode::Fetch => "fetch",
    };
    format!("kan_repository_{kind_word}_{mode_word}_query_t")
}

fn open_boilerplate(
    kind: QueryKind,
    mode: QueryMode,
    field_name: &str,
    type_name: &str,
    mangled: &str,
    state_path: &str,
) -> String {
    if macros::is_iteration(kind, mode) {
        format!(
            "{{\nkan_repository_{mangled}_cursor_t {field_name}_cursor = kan_repository_{mangled}_query_execute (&{state_path}->{mangled});\nwhile (KAN_TRUE)\n{{\nstruct {type_name} *{field_name} = (struct {type_name} *) kan_repository_{mangled}_cursor_next (&{field_name}_cursor);\nif (!{field_name})\n",
        )
    } else {
        match kind {
            QueryKind::IndexedInsert => format!(
                "{{\nkan_repository_indexed_insertion_package_t {field_name}_package = kan_repository_indexed_insert_query_execute (&{state_path}->insert__{type_name});\nstruct {type_name} *{field_name} = (struct {type_name} *) kan_repository_indexed_insertion_package_get (&{field_name}_package);\n",
            ),
            QueryKind::Event if mode == QueryMode::Insert => format!(
                "{{\nkan_repository_event_insertion_package_t {field_name}_package = kan_repository_event_insert_query_execute (&{state_path}->event_insert__{type_name});\nstruct {type_name} *{field_name} = (struct {type_name} *) kan_repository_event_insertion_package_get (&{field_name}_package);\n",
            ),
            _ => format!(
                "{{\nkan_repository_{mangled}_access_t {field_name}_access = kan_repository_{mangled}_query_execute (&{state_path}->{mangled});\nstruct {type_name} *{field_name} = (struct {type_name} *) kan_repository_{mangled}_access_resolve (&{field_name}_access);\nkan_bool_t {field_name}_access_expired = KAN_FALSE;\n",
            ),
        }
    }
}

fn render_state_queries(state: &ScannedState, path: &str, line: u32) -> String {
    let mut out = String::new();
    for field in state.queries.values() {
        out.push_str(&format!("    {} {};\n", field.field_type, field.mangled_name));
    }
    out.push_str(&format!("#line {line} \"{path}\"\n"));
    out
}
