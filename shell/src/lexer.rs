//! Tokenization of a raw command line into the argument strings the dispatcher expects.
//!
//! Quotes and escapes are resolved here, operators are split off even without
//! surrounding blanks, and `$NAME`, `${NAME}`, `$?` and a leading `~` are
//! expanded. Single-quoted and escaped text is never expanded.

use crate::dispatch::{APPEND, BACKGROUND, PIPE, READ_FROM, WRITE_TO};
use regex::{Captures, Regex};
use thiserror::Error;

/// Errors that can occur during the lexical analysis process.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LexingError {
    /// A closing quote (single or double) was not found.
    #[error("unterminated {0} quote")]
    UnfinishedQuote(char),
}

/// How a piece of a word was written, which decides what gets expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartKind {
    /// Unquoted: variables and a leading tilde expand.
    Bare,
    /// Inside double quotes: variables expand.
    DoubleQuoted,
    /// Single-quoted or escaped: taken as is.
    Literal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RawToken {
    Word(Vec<(PartKind, String)>),
    Operator(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Start,
    ReadingWord,
    ReadingSingleQuote,
    ReadingDoubleQuote,
}

struct LexingFSM {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    parts: Vec<(PartKind, String)>,
    buffer: String,
    kind: PartKind,
    /// Set once anything (even `''`) started the current word.
    in_word: bool,
    out: Vec<RawToken>,
}

impl LexingFSM {
    fn new(line: &str) -> Self {
        LexingFSM {
            input: line.chars().collect(),
            pos: 0,
            state: LexingState::Start,
            parts: Vec::new(),
            buffer: String::new(),
            kind: PartKind::Bare,
            in_word: false,
            out: Vec::new(),
        }
    }

    fn make_tokens(mut self) -> Result<Vec<RawToken>, LexingError> {
        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::Start => self.handle_start(ch),
                LexingState::ReadingWord => self.handle_word(ch),
                LexingState::ReadingSingleQuote => self.handle_single_quote(ch),
                LexingState::ReadingDoubleQuote => self.handle_double_quote(ch),
            }
        }

        match self.state {
            LexingState::ReadingSingleQuote => return Err(LexingError::UnfinishedQuote('\'')),
            LexingState::ReadingDoubleQuote => return Err(LexingError::UnfinishedQuote('"')),
            _ => {}
        }
        self.finish_word();
        Ok(self.out)
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn handle_start(&mut self, ch: char) {
        match ch {
            c if c.is_whitespace() => {}
            // comment runs to the end of the line
            '#' => self.pos = self.input.len(),
            _ => {
                self.state = LexingState::ReadingWord;
                self.handle_word(ch);
            }
        }
    }

    fn handle_word(&mut self, ch: char) {
        match ch {
            c if c.is_whitespace() => {
                self.finish_word();
                self.state = LexingState::Start;
            }
            '|' | '&' | '<' | '>' => {
                self.finish_word();
                self.push_operator(ch);
                self.state = LexingState::Start;
            }
            '\'' => {
                self.in_word = true;
                self.state = LexingState::ReadingSingleQuote;
            }
            '"' => {
                self.in_word = true;
                self.state = LexingState::ReadingDoubleQuote;
            }
            '\\' => match self.read_char() {
                Some(escaped) => self.push(PartKind::Literal, escaped),
                None => self.push(PartKind::Literal, '\\'),
            },
            c => self.push(PartKind::Bare, c),
        }
    }

    fn handle_single_quote(&mut self, ch: char) {
        match ch {
            '\'' => self.state = LexingState::ReadingWord,
            c => self.push(PartKind::Literal, c),
        }
    }

    fn handle_double_quote(&mut self, ch: char) {
        match ch {
            '"' => self.state = LexingState::ReadingWord,
            '\\' if matches!(self.peek_char(), Some('"' | '\\' | '$')) => {
                if let Some(escaped) = self.read_char() {
                    self.push(PartKind::Literal, escaped);
                }
            }
            c => self.push(PartKind::DoubleQuoted, c),
        }
    }

    fn push_operator(&mut self, ch: char) {
        let op = match ch {
            '|' => PIPE,
            '&' => BACKGROUND,
            '<' => READ_FROM,
            '>' if self.peek_char() == Some('>') => {
                self.read_char();
                APPEND
            }
            _ => WRITE_TO,
        };
        self.out.push(RawToken::Operator(op));
    }

    fn push(&mut self, kind: PartKind, ch: char) {
        if kind != self.kind && !self.buffer.is_empty() {
            self.flush_part();
        }
        self.kind = kind;
        self.in_word = true;
        self.buffer.push(ch);
    }

    fn flush_part(&mut self) {
        if !self.buffer.is_empty() {
            self.parts.push((self.kind, std::mem::take(&mut self.buffer)));
        }
    }

    fn finish_word(&mut self) {
        self.flush_part();
        if self.in_word {
            self.out.push(RawToken::Word(std::mem::take(&mut self.parts)));
        }
        self.in_word = false;
        self.kind = PartKind::Bare;
    }
}

/// Splits command lines and expands variables in them.
pub struct Lexer {
    var_pattern: Regex,
}

impl Lexer {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            var_pattern: Regex::new(r"\$(\w+|\{[^}]+\}|\?)")?,
        })
    }

    /// Tokenize `line`, resolving variables through `lookup`.
    ///
    /// `lookup` receives the bare name (`HOME`, `?`); unknown names expand to
    /// nothing. A blank or comment-only line yields no tokens.
    pub fn split_into_tokens(
        &self,
        line: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Vec<String>, LexingError> {
        let raw = LexingFSM::new(line).make_tokens()?;
        Ok(raw
            .into_iter()
            .map(|token| match token {
                RawToken::Operator(op) => op.to_string(),
                RawToken::Word(parts) => self.expand_word(&parts, &lookup),
            })
            .collect())
    }

    fn expand_word(&self, parts: &[(PartKind, String)], lookup: &dyn Fn(&str) -> Option<String>) -> String {
        let mut word = String::new();
        for (i, (kind, text)) in parts.iter().enumerate() {
            match kind {
                PartKind::Literal => word.push_str(text),
                PartKind::DoubleQuoted => word.push_str(&self.expand_vars(text, lookup)),
                PartKind::Bare => {
                    let text = if i == 0 { expand_tilde(text, lookup) } else { text.clone() };
                    word.push_str(&self.expand_vars(&text, lookup));
                }
            }
        }
        word
    }

    fn expand_vars(&self, text: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
        self.var_pattern
            .replace_all(text, |caps: &Captures| {
                let name = caps[1].trim_start_matches('{').trim_end_matches('}');
                lookup(name).unwrap_or_default()
            })
            .into_owned()
    }
}

fn expand_tilde(text: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    if text != "~" && !text.starts_with("~/") {
        return text.to_string();
    }
    match lookup("HOME") {
        Some(home) => format!("{home}{}", &text[1..]),
        None => text.to_string(),
    }
}
