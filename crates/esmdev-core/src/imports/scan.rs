//! Import specifier scanner.
//!
//! Finds `import ... from "x"`, `import "x"`, `export ... from "x"` and
//! `import(...)` in module source without full parsing. Offsets are byte
//! offsets into the scanned text, so specifiers can be replaced in place.

use std::ops::Range;

/// Syntactic form of an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    /// `import x from "y"` or `import "y"`.
    Static,
    /// `export { x } from "y"` or `export * from "y"`.
    ExportFrom,
    /// `import(expr)`.
    Dynamic,
}

/// An import found in source code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpan {
    pub kind: ImportKind,
    /// Specifier text: between the quotes for static forms, the whole
    /// argument for `import()`.
    pub specifier: Range<usize>,
    /// From the `import`/`export` keyword through the closing quote or parenthesis.
    pub statement: Range<usize>,
    /// Text between the keyword and `from`, when the statement has bindings.
    pub clause: Option<Range<usize>>,
}

impl ImportSpan {
    #[must_use]
    pub fn specifier<'a>(&self, source: &'a str) -> &'a str {
        &source[self.specifier.clone()]
    }

    #[must_use]
    pub fn statement<'a>(&self, source: &'a str) -> &'a str {
        &source[self.statement.clone()]
    }

    #[must_use]
    pub fn clause<'a>(&self, source: &'a str) -> Option<&'a str> {
        self.clause.clone().map(|r| source[r].trim())
    }

    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.kind == ImportKind::Dynamic
    }

    /// 1-indexed line of the statement start.
    #[must_use]
    pub fn line(&self, source: &str) -> usize {
        source[..self.statement.start].matches('\n').count() + 1
    }
}

/// Source text the scanner could not tokenize.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} at byte {offset}")]
pub struct LexError {
    pub offset: usize,
    pub message: &'static str,
}

/// Scan source code for imports, in order of appearance.
///
/// Every occurrence is reported, including repeated specifiers. Keywords in
/// comments, strings, template literals and regular expressions are ignored,
/// as are `import.meta` and member accesses like `obj.import`.
pub fn scan_imports(source: &str) -> Result<Vec<ImportSpan>, LexError> {
    let mut lexer = Lexer {
        src: source.as_bytes(),
        pos: 0,
    };
    let mut spans = Vec::new();

    while lexer.pos < lexer.src.len() {
        let start = lexer.pos;
        if lexer.at_keyword("import") {
            lexer.pos += "import".len();
            let resume = lexer.pos;
            match lexer.import_after_keyword(start)? {
                Some(span) => spans.push(span),
                None => lexer.pos = resume,
            }
        } else if lexer.at_keyword("export") {
            lexer.pos += "export".len();
            let resume = lexer.pos;
            match lexer.export_after_keyword(start)? {
                Some(span) => spans.push(span),
                None => lexer.pos = resume,
            }
        } else if lexer.peek(0).is_some_and(is_ident) {
            // Skip whole identifiers so `reimport` never matches
            while lexer.peek(0).is_some_and(is_ident) {
                lexer.pos += 1;
            }
        } else {
            lexer.step()?;
        }
    }

    Ok(spans)
}

/// Keywords after which `/` starts a regular expression, not a division.
const REGEX_PREFIX_KEYWORDS: &[&[u8]] = &[
    b"return", b"typeof", b"case", b"yield", b"await", b"in", b"of", b"void", b"delete",
    b"new", b"instanceof", b"throw", b"else", b"do",
];

fn is_ident(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
}

impl Lexer<'_> {
    fn peek(&self, n: usize) -> Option<u8> {
        self.src.get(self.pos + n).copied()
    }

    fn error(offset: usize, message: &'static str) -> LexError {
        LexError { offset, message }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        let end = self.pos + keyword.len();
        if self.src.get(self.pos..end) != Some(keyword.as_bytes()) {
            return false;
        }
        if self.pos > 0 {
            let prev = self.src[self.pos - 1];
            if is_ident(prev) || prev == b'.' {
                return false;
            }
        }
        !self.src.get(end).copied().is_some_and(is_ident)
    }

    /// Skip one code token: a comment, string, template, regex, or a single byte.
    fn step(&mut self) -> Result<(), LexError> {
        match self.peek(0) {
            Some(b'/') if matches!(self.peek(1), Some(b'/' | b'*')) => self.skip_comment(),
            Some(b'/') if self.regex_allowed() => {
                self.skip_regex();
                Ok(())
            }
            Some(b'"' | b'\'') => self.skip_string().map(|_| ()),
            Some(b'`') => self.skip_template(),
            Some(_) => {
                self.pos += 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn skip_comment(&mut self) -> Result<(), LexError> {
        let start = self.pos;
        if self.peek(1) == Some(b'/') {
            while self.peek(0).is_some_and(|b| b != b'\n') {
                self.pos += 1;
            }
            return Ok(());
        }
        self.pos += 2;
        loop {
            match (self.peek(0), self.peek(1)) {
                (Some(b'*'), Some(b'/')) => {
                    self.pos += 2;
                    return Ok(());
                }
                (Some(_), _) => self.pos += 1,
                (None, _) => return Err(Self::error(start, "unterminated block comment")),
            }
        }
    }

    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            match self.peek(0) {
                Some(b) if b.is_ascii_whitespace() => self.pos += 1,
                Some(b'/') if matches!(self.peek(1), Some(b'/' | b'*')) => self.skip_comment()?,
                _ => return Ok(()),
            }
        }
    }

    /// At an opening quote. Returns the range between the quotes.
    fn skip_string(&mut self) -> Result<Range<usize>, LexError> {
        let start = self.pos;
        let Some(quote) = self.peek(0) else {
            return Err(Self::error(start, "expected string literal"));
        };
        self.pos += 1;
        let content = self.pos;
        while let Some(b) = self.peek(0) {
            match b {
                b'\\' => self.pos += 2,
                b'\n' => break,
                _ if b == quote => {
                    let range = content..self.pos;
                    self.pos += 1;
                    return Ok(range);
                }
                _ => self.pos += 1,
            }
        }
        Err(Self::error(start, "unterminated string literal"))
    }

    fn skip_template(&mut self) -> Result<(), LexError> {
        let start = self.pos;
        self.pos += 1;
        while let Some(b) = self.peek(0) {
            match b {
                b'\\' => self.pos += 2,
                b'`' => {
                    self.pos += 1;
                    return Ok(());
                }
                b'$' if self.peek(1) == Some(b'{') => {
                    self.pos += 2;
                    self.skip_balanced(b'{', b'}')?;
                }
                _ => self.pos += 1,
            }
        }
        Err(Self::error(start, "unterminated template literal"))
    }

    /// Whether a `/` at the current position starts a regular expression.
    ///
    /// True after punctuation that ends no expression, and after keywords
    /// that take an operand (`return /x/`).
    fn regex_allowed(&self) -> bool {
        let Some(end) = self.src[..self.pos]
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
        else {
            return true;
        };
        let prev = self.src[end];
        if !is_ident(prev) {
            return b"(,=:[!&|?{};+-*%<>~^".contains(&prev);
        }
        let start = self.src[..=end]
            .iter()
            .rposition(|&b| !is_ident(b))
            .map_or(0, |i| i + 1);
        if start > 0 && self.src[start - 1] == b'.' {
            return false;
        }
        REGEX_PREFIX_KEYWORDS.contains(&&self.src[start..=end])
    }

    /// At a `/` that starts a regex. A regex that runs into a newline is
    /// taken to be a division instead.
    fn skip_regex(&mut self) {
        let start = self.pos;
        self.pos += 1;
        let mut in_class = false;
        while let Some(b) = self.peek(0) {
            match b {
                b'\\' => self.pos += 2,
                b'\n' => break,
                b'[' => {
                    in_class = true;
                    self.pos += 1;
                }
                b']' => {
                    in_class = false;
                    self.pos += 1;
                }
                b'/' if !in_class => {
                    self.pos += 1;
                    while self.peek(0).is_some_and(|b| b.is_ascii_alphabetic()) {
                        self.pos += 1;
                    }
                    return;
                }
                _ => self.pos += 1,
            }
        }
        self.pos = start + 1;
    }

    /// Skip code up to and including the `close` matching an already consumed `open`.
    fn skip_balanced(&mut self, open: u8, close: u8) -> Result<(), LexError> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(b) = self.peek(0) {
            if b == open {
                depth += 1;
                self.pos += 1;
            } else if b == close {
                self.pos += 1;
                if depth == 0 {
                    return Ok(());
                }
                depth -= 1;
            } else {
                self.step()?;
            }
        }
        Err(Self::error(start, "unbalanced brackets"))
    }

    fn import_after_keyword(&mut self, start: usize) -> Result<Option<ImportSpan>, LexError> {
        let keyword_end = self.pos;
        self.skip_trivia()?;
        match self.peek(0) {
            Some(b'(') => {
                let open = self.pos;
                self.pos += 1;
                self.skip_balanced(b'(', b')')?;
                Ok(Some(ImportSpan {
                    kind: ImportKind::Dynamic,
                    specifier: open + 1..self.pos - 1,
                    statement: start..self.pos,
                    clause: None,
                }))
            }
            Some(b'"' | b'\'') => {
                let specifier = self.skip_string()?;
                Ok(Some(ImportSpan {
                    kind: ImportKind::Static,
                    specifier,
                    statement: start..self.pos,
                    clause: None,
                }))
            }
            // `import.meta`
            Some(b'.') => Ok(None),
            _ => self.bindings_then_from(start, keyword_end, ImportKind::Static),
        }
    }

    fn export_after_keyword(&mut self, start: usize) -> Result<Option<ImportSpan>, LexError> {
        let keyword_end = self.pos;
        self.skip_trivia()?;
        match self.peek(0) {
            Some(b'*' | b'{') => self.bindings_then_from(start, keyword_end, ImportKind::ExportFrom),
            _ => Ok(None),
        }
    }

    /// Consume a binding list (`x, { a as b }`, `* as ns`, ...) followed by
    /// `from "specifier"`. Anything else means this is not an import.
    fn bindings_then_from(
        &mut self,
        start: usize,
        clause_start: usize,
        kind: ImportKind,
    ) -> Result<Option<ImportSpan>, LexError> {
        loop {
            self.skip_trivia()?;
            let Some(b) = self.peek(0) else {
                return Ok(None);
            };

            if self.at_keyword("from") {
                let clause_end = self.pos;
                self.pos += "from".len();
                self.skip_trivia()?;
                if matches!(self.peek(0), Some(b'"' | b'\'')) {
                    let specifier = self.skip_string()?;
                    return Ok(Some(ImportSpan {
                        kind,
                        specifier,
                        statement: start..self.pos,
                        clause: Some(clause_start..clause_end),
                    }));
                }
                // `from` used as a binding name
                continue;
            }

            match b {
                b'{' => {
                    self.pos += 1;
                    self.skip_balanced(b'{', b'}')?;
                }
                b'*' | b',' => self.pos += 1,
                _ if is_ident(b) => {
                    while self.peek(0).is_some_and(is_ident) {
                        self.pos += 1;
                    }
                }
                _ => return Ok(None),
            }
        }
    }
}
