//! Token scanner for the narrow C subset the reflection preprocessor
//! understands: identifiers/keywords, single-character punctuation, string
//! and numeric literals, and the `#`-prefixed directive lines a C
//! preprocessor leaves behind (`#line`, `#pragma kan_*`, and MSVC's
//! `__pragma(...)`).
//!
//! `peek` is implemented on top of [`ByteScanner::mark`]/`restore`: we scan
//! one token for real, then rewind the scanner back to where we started
//! and hand the caller the token we just "pre-played". Every other
//! lookahead in the parser (function vs. symbol, union vs. plain struct
//! field, trailing `,` after an enum value) goes through this one peek.

use kan_codegen_core::ByteScanner;
use std::io::Read;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub line: u32,
    pub column: u32,
}

impl PartialEq<&str> for Token {
    fn eq(&self, other: &&str) -> bool {
        self.text == *other
    }
}

const PUNCT: &[u8] = b"(){}[];,*=:#";

pub struct Lexer<R> {
    scanner: ByteScanner<R>,
    peeked: Option<Option<Token>>,
}

impl<R: Read> Lexer<R> {
    pub fn new(source: R) -> Self {
        Lexer {
            scanner: ByteScanner::new(source),
            peeked: None,
        }
    }

    pub fn next(&mut self) -> Option<Token> {
        if let Some(t) = self.peeked.take() {
            return t;
        }
        self.scan_raw()
    }

    pub fn peek(&mut self) -> Option<&Token> {
        if self.peeked.is_none() {
            let t = self.scan_raw();
            self.peeked = Some(t);
        }
        self.peeked.as_ref().unwrap().as_ref()
    }

    /// Peek a token starting after the currently-peeked one, without
    /// disturbing it. Used by the two-token lookaheads (e.g. `NAME (`).
    pub fn peek_second(&mut self) -> Option<Token> {
        // Force the first peek to be materialized, then use mark/restore
        // around scanning the one after it.
        self.peek();
        let mark = self.scanner.mark();
        let second = self.scan_raw();
        self.scanner.restore(mark);
        second
    }

    pub fn line(&self) -> u32 {
        self.scanner.line()
    }

    pub fn column(&self) -> u32 {
        self.scanner.column()
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.scanner.peek() {
                Some(b) if b.is_ascii_whitespace() => {
                    self.scanner.advance();
                }
                Some(b'/') => {
                    let mark = self.scanner.mark();
                    self.scanner.advance();
                    match self.scanner.peek() {
                        Some(b'/') => {
                            self.scanner.release(mark);
                            while let Some(b) = self.scanner.peek() {
                                if b == b'\n' {
                                    break;
                                }
                                self.scanner.advance();
                            }
                        }
                        Some(b'*') => {
                            self.scanner.release(mark);
                            self.scanner.advance();
                            let mut prev = 0u8;
                            while let Some(b) = self.scanner.advance() {
                                if prev == b'*' && b == b'/' {
                                    break;
                                }
                                prev = b;
                            }
                        }
                        _ => {
                            self.scanner.restore(mark);
                            return;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn scan_raw(&mut self) -> Option<Token> {
        self.skip_trivia();
        let line = self.scanner.line();
        let column = self.scanner.column();
        let first = self.scanner.peek()?;

        if first == b'"' || first == b'\'' {
            let quote = first;
            let mut text = String::new();
            text.push(self.scanner.advance().unwrap() as char);
            let mut escaped = false;
            while let Some(b) = self.scanner.advance() {
                text.push(b as char);
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == quote {
                    break;
                } else if b == b'\n' {
                    break;
                }
            }
            return Some(Token { text, line, column });
        }

        if first.is_ascii_alphabetic() || first == b'_' {
            let mut text = String::new();
            while let Some(b) = self.scanner.peek() {
                if b.is_ascii_alphanumeric() || b == b'_' {
                    text.push(self.scanner.advance().unwrap() as char);
                } else {
                    break;
                }
            }
            return Some(Token { text, line, column });
        }

        if first.is_ascii_digit() {
            let mut text = String::new();
            while let Some(b) = self.scanner.peek() {
                if b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'-' || b == b'+' {
                    text.push(self.scanner.advance().unwrap() as char);
                } else {
                    break;
                }
            }
            return Some(Token { text, line, column });
        }

        if PUNCT.contains(&first) {
            self.scanner.advance();
            return Some(Token {
                text: (first as char).to_string(),
                line,
                column,
            });
        }

        // Any other punctuation (operators inside `= expr;` initializers,
        // etc.) is consumed one byte at a time; the parser only needs to
        // recognize the tokens it cares about and otherwise copies text
        // through verbatim.
        self.scanner.advance();
        Some(Token {
            text: (first as char).to_string(),
            line,
            column,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn lexer(s: &str) -> Lexer<Cursor<Vec<u8>>> {
        Lexer::new(Cursor::new(s.as_bytes().to_vec()))
    }

    #[test]
    fn tokenizes_identifiers_and_punctuation() {
        let mut l = lexer("struct Foo { int x; };");
        let toks: Vec<String> = std::iter::from_fn(|| l.next()).map(|t| t.text).collect();
        assert_eq!(
            toks,
            vec!["struct", "Foo", "{", "int", "x", ";", "}", ";"]
        );
    }

    #[test]
    fn skips_line_and_block_comments() {
        let mut l = lexer("int /* c */ x; // trailing\ny;");
        let toks: Vec<String> = std::iter::from_fn(|| l.next()).map(|t| t.text).collect();
        assert_eq!(toks, vec!["int", "x", ";", "y", ";"]);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut l = lexer("a b");
        assert_eq!(l.peek().unwrap().text, "a");
        assert_eq!(l.peek().unwrap().text, "a");
        assert_eq!(l.next().unwrap().text, "a");
        assert_eq!(l.next().unwrap().text, "b");
    }

    #[test]
    fn peek_second_does_not_disturb_peek() {
        let mut l = lexer("a b c");
        assert_eq!(l.peek_second().unwrap().text, "b");
        assert_eq!(l.peek().unwrap().text, "a");
        assert_eq!(l.next().unwrap().text, "a");
        assert_eq!(l.next().unwrap().text, "b");
    }

    #[test]
    fn string_literal_is_one_token_with_quotes() {
        let mut l = lexer(r#"kan_string_intern("foo")"#);
        l.next(); // kan_string_intern
        l.next(); // (
        let tok = l.next().unwrap();
        assert_eq!(tok.text, "\"foo\"");
    }

    #[test]
    fn tracks_line_numbers_across_tokens() {
        let mut l = lexer("a\nb\nc");
        assert_eq!(l.next().unwrap().line, 1);
        assert_eq!(l.next().unwrap().line, 2);
        assert_eq!(l.next().unwrap().line, 3);
    }
}
