/// Position in source code
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct Position {
    /// Byte offset in source
    pub byte: usize,
    /// Line number (0-indexed)
    pub line: usize,
    /// Column number (0-indexed, in characters)
    pub col: usize,
}

impl Position {
    pub fn new() -> Self {
        Self { byte: 0, line: 0, col: 0 }
    }
}

/// Span in source code (a range from start position to end position)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Zero-width span at a position
    pub fn point(position: Position) -> Self {
        Self { start: position, end: position }
    }

    /// Span covering both `self` and `other`
    pub fn to(self, other: Span) -> Span {
        Span { start: self.start, end: other.end }
    }
}

/// Token categories produced by the lexer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Keyword,
    /// Quoted literal; `text` holds the unescaped content
    String,
    Number,
    /// `#fff`, `#header`: a hash followed by at least two word characters
    HashLiteral,
    /// Single structural character: `{ } ( ) [ ] : ; , . @`
    Punct,
    Operator,
    LineComment,
    BlockComment,
    /// `# text` comment that is carried into the generated HTML
    GeneratorComment,
    Eof,
}

/// Token produced by the lexer. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
}

impl Token {
    pub fn span(&self) -> Span {
        self.span
    }

    pub fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct && self.text.len() == 1 && self.text.starts_with(c)
    }

    pub fn is_operator(&self, op: &str) -> bool {
        self.kind == TokenKind::Operator && self.text == op
    }

    /// Identifier or keyword, usable as a name
    pub fn is_name(&self) -> bool {
        matches!(self.kind, TokenKind::Identifier | TokenKind::Keyword)
    }

    /// Name token with exactly this spelling
    pub fn is_word(&self, word: &str) -> bool {
        self.is_name() && self.text == word
    }

    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }

    /// Comments the parser never looks at
    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::LineComment | TokenKind::BlockComment)
    }
}

/// Words the lexer tags as keywords. The parser still accepts them as
/// names where a name is expected (`style`, `text` and friends are also
/// legal attribute and property names).
pub const KEYWORDS: &[&str] = &[
    "Template", "Custom", "Import", "Configuration", "Namespace", "Origin", "Name", "Info",
    "Export", "Style", "Element", "Var", "Html", "JavaScript", "Config", "Chtl",
    "text", "style", "script", "use", "delete", "inherit", "insert", "except", "from", "as",
    "before", "after", "replace", "at", "top", "bottom",
];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

const TWO_CHAR_OPERATORS: &[&str] = &["->", "=>", "&&", "||", "==", "!=", ">=", "<=", "**"];
const ONE_CHAR_OPERATORS: &str = "+-*/%?!<>=&|~^$";
const PUNCTUATION: &str = "{}()[]:;,.@";

/// Converts source text into a flat token sequence
pub struct Tokenizer<'a> {
    source: &'a str,
    position: Position,
    tokens: Vec<Token>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self::starting_at(source, Position::new())
    }

    /// Resume lexing from an arbitrary position (used after raw block capture)
    pub fn starting_at(source: &'a str, position: Position) -> Self {
        Self { source, position, tokens: Vec::new() }
    }

    pub fn tokenize(mut self) -> Vec<Token> {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
                continue;
            }

            let start = self.position;
            match c {
                '/' if self.peek_at(1) == Some('/') && !self.follows_scheme_colon() => {
                    self.line_comment(start)
                }
                '/' if self.peek_at(1) == Some('*') => self.block_comment(start),
                '#' => self.hash(start),
                '"' | '\'' => self.string(start, c),
                c if c.is_ascii_digit() => self.number(start),
                c if is_ident_start(c) => self.identifier(start),
                c if PUNCTUATION.contains(c) => {
                    self.bump();
                    self.push(TokenKind::Punct, c.to_string(), start);
                }
                _ => self.operator(start),
            }
        }

        let end = self.position;
        self.tokens.push(Token {
            kind: TokenKind::Eof,
            text: String::new(),
            span: Span::point(end),
        });
        self.tokens
    }

    fn peek(&self) -> Option<char> {
        self.source[self.position.byte..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.source[self.position.byte..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.position.byte += c.len_utf8();
        if c == '\n' {
            self.position.line += 1;
            self.position.col = 0;
        } else {
            self.position.col += 1;
        }
        Some(c)
    }

    fn push(&mut self, kind: TokenKind, text: String, start: Position) {
        self.tokens.push(Token {
            kind,
            text,
            span: Span::new(start, self.position),
        });
    }

    // `scheme://` inside url(...) is not a comment
    fn follows_scheme_colon(&self) -> bool {
        self.position.byte > 0 && self.source.as_bytes()[self.position.byte - 1] == b':'
    }

    fn line_comment(&mut self, start: Position) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
        let text = self.source[start.byte..self.position.byte].to_string();
        self.push(TokenKind::LineComment, text, start);
    }

    fn block_comment(&mut self, start: Position) {
        self.bump();
        self.bump();
        while self.peek().is_some() {
            if self.peek() == Some('*') && self.peek_at(1) == Some('/') {
                self.bump();
                self.bump();
                break;
            }
            self.bump();
        }
        let text = self.source[start.byte..self.position.byte].to_string();
        self.push(TokenKind::BlockComment, text, start);
    }

    /// `#` followed by two or more word characters and then a declaration
    /// boundary is a literal (`#fff;`, `#main {`); anything else starts a
    /// generator comment running to the end of the line.
    fn hash(&mut self, start: Position) {
        let rest = &self.source[self.position.byte + 1..];
        let word_len = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .count();
        let boundary = rest.chars().nth(word_len);
        let is_literal = word_len >= 2
            && match boundary {
                None => true,
                Some(c) => c.is_whitespace() || ";{},):.".contains(c),
            };

        self.bump();
        if is_literal {
            for _ in 0..word_len {
                self.bump();
            }
            let text = self.source[start.byte..self.position.byte].to_string();
            self.push(TokenKind::HashLiteral, text, start);
            return;
        }

        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
        let text = self.source[start.byte + 1..self.position.byte].trim().to_string();
        self.push(TokenKind::GeneratorComment, text, start);
    }

    fn string(&mut self, start: Position, quote: char) {
        self.bump();
        let mut value = String::new();
        while let Some(c) = self.bump() {
            if c == quote {
                break;
            }
            if c == '\\' {
                match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(escaped) => value.push(escaped),
                    None => break,
                }
                continue;
            }
            value.push(c);
        }
        self.push(TokenKind::String, value, start);
    }

    fn number(&mut self, start: Position) {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        let text = self.source[start.byte..self.position.byte].to_string();
        self.push(TokenKind::Number, text, start);
    }

    fn identifier(&mut self, start: Position) {
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.bump();
            } else if c == '-' && self.peek_at(1).is_some_and(is_ident_start) {
                self.bump();
            } else {
                break;
            }
        }
        let text = self.source[start.byte..self.position.byte].to_string();
        let kind = if is_keyword(&text) { TokenKind::Keyword } else { TokenKind::Identifier };
        self.push(kind, text, start);
    }

    fn operator(&mut self, start: Position) {
        let rest = &self.source[self.position.byte..];
        if let Some(op) = TWO_CHAR_OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            self.bump();
            self.bump();
            self.push(TokenKind::Operator, op.to_string(), start);
            return;
        }

        let Some(c) = self.bump() else { return };
        if ONE_CHAR_OPERATORS.contains(c) {
            self.push(TokenKind::Operator, c.to_string(), start);
        }
        // anything else is skipped
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

/// Tokenize source text. Never fails; always ends with an `Eof` token.
pub fn tokenize(source: &str) -> Vec<Token> {
    Tokenizer::new(source).tokenize()
}
