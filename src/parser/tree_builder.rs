use super::keywords::{Keyword, KeywordTable};
use super::positions::position_at;
use super::tokenizer::{Span, Token, TokenKind, Tokenizer};
use crate::ast::*;
use crate::context::{CompilationContext, ConfigurationInfo, ImportInfo};
use crate::error::{ErrorKind, ParseError};
use crate::scanner::raw_tag_end;
use std::sync::Arc;
use tracing::debug;

/// Nodes, the populated context and every syntax error that was recovered from
#[derive(Debug)]
pub struct BuildOutput {
    pub nodes: Vec<Node>,
    pub context: CompilationContext,
    pub errors: Vec<ParseError>,
}

enum BodyItem {
    Attribute(Attribute),
    Child(Node),
}

/// Builds an AST from a token stream, registering definitions as it goes
pub struct TreeBuilder {
    tokens: Vec<Token>,
    pos: usize,
    source: Arc<str>,
    context: CompilationContext,
    keywords: KeywordTable,
    /// Enclosing namespace names, outermost first
    scope: Vec<String>,
    errors: Vec<ParseError>,
}

impl TreeBuilder {
    pub fn new(tokens: Vec<Token>, source: Arc<str>) -> Self {
        let mut tokens: Vec<Token> = tokens.into_iter().filter(|t| !t.is_trivia()).collect();
        if !tokens.last().is_some_and(Token::is_eof) {
            let end = position_at(&source, source.len());
            tokens.push(Token { kind: TokenKind::Eof, text: String::new(), span: Span::point(end) });
        }
        Self {
            tokens,
            pos: 0,
            source,
            context: CompilationContext::new(),
            keywords: KeywordTable::default(),
            scope: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn build(mut self) -> BuildOutput {
        let nodes = self.parse_statements(false);
        BuildOutput { nodes, context: self.context, errors: self.errors }
    }

    // === Navigation ===

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let index = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[index]
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if !token.is_eof() {
            self.pos += 1;
        }
        token
    }

    fn is_at_end(&self) -> bool {
        self.peek().is_eof()
    }

    fn current_span(&self) -> Span {
        self.peek().span
    }

    fn previous_span(&self) -> Span {
        if self.pos == 0 {
            self.current_span()
        } else {
            self.tokens[self.pos - 1].span
        }
    }

    fn check(&self, c: char) -> bool {
        self.peek().is_punct(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.check(c) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char, purpose: &str) -> Result<Token, ParseError> {
        if self.check(c) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("Expected '{}' {}", c, purpose)))
        }
    }

    fn expect_name(&mut self, what: &str) -> Result<Token, ParseError> {
        if self.peek().is_name() {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("Expected {}", what)))
        }
    }

    /// Require the `}` closing a block opened at `open`
    fn expect_close(&mut self, open: Span, what: &str) -> Result<Token, ParseError> {
        if self.check('}') {
            return Ok(self.advance());
        }
        Err(ParseError::new(
            ErrorKind::UnclosedBlock,
            format!("This {} block is never closed", what),
            self.current_span(),
        )
        .with_related(open)
        .with_help("Close the block with '}'"))
    }

    fn unexpected(&self, message: &str) -> ParseError {
        let token = self.peek();
        let found = if token.is_eof() {
            "end of input".to_string()
        } else {
            format!("'{}'", token.text)
        };
        ParseError::new(ErrorKind::UnexpectedToken, format!("{}, found {}", message, found), token.span)
    }

    /// `;` ends a statement; a block-terminated statement or the enclosing `}` may stand in for it
    fn finish_statement(&mut self, after_block: bool) -> Result<(), ParseError> {
        if self.eat(';') || after_block || self.check('}') {
            Ok(())
        } else {
            Err(self.unexpected("Expected ';'"))
        }
    }

    fn at_keyword(&self, keyword: Keyword) -> bool {
        let token = self.peek();
        token.is_name() && self.keywords.matches(keyword, &token.text)
    }

    /// `@Style`, `@Element`, `@Var` (or their configured spellings) at `offset`
    fn at_type_at(&self, offset: usize, keyword: Keyword) -> bool {
        let at = self.peek_at(offset);
        let name = self.peek_at(offset + 1);
        at.is_punct('@') && name.is_name() && self.keywords.matches(keyword, &format!("@{}", name.text))
    }

    fn at_type(&self, keyword: Keyword) -> bool {
        self.at_type_at(0, keyword)
    }

    /// `[Template]` or `[Custom]` at the current position
    fn definition_prefix_ahead(&self) -> Option<DefinitionKind> {
        if !self.check('[') || !self.peek_at(2).is_punct(']') {
            return None;
        }
        match self.peek_at(1).text.as_str() {
            "Template" => Some(DefinitionKind::Template),
            "Custom" => Some(DefinitionKind::Custom),
            _ => None,
        }
    }

    /// Kind of the reference starting here, with or without a definition prefix
    fn reference_ahead(&self) -> Option<ReferenceKind> {
        let offset = if self.definition_prefix_ahead().is_some() { 3 } else { 0 };
        if self.at_type_at(offset, Keyword::StyleType) {
            Some(ReferenceKind::Style)
        } else if self.at_type_at(offset, Keyword::ElementType) {
            Some(ReferenceKind::Element)
        } else if self.at_type_at(offset, Keyword::VarType) {
            Some(ReferenceKind::Var)
        } else {
            None
        }
    }

    fn scope_path(&self) -> String {
        self.scope.join(".")
    }

    fn refresh_keywords(&mut self) {
        self.keywords = KeywordTable::from_configuration(self.context.active_configuration());
    }

    // === Raw text helpers ===

    /// Index of the first token at bracket depth 0 that is one of `stops`
    /// (or the end-of-input token).
    fn find_stop(&self, stops: &str) -> usize {
        let mut depth = 0usize;
        for i in self.pos..self.tokens.len() {
            let token = &self.tokens[i];
            if token.is_eof() {
                return i;
            }
            if token.kind != TokenKind::Punct {
                continue;
            }
            let Some(c) = token.text.chars().next() else { continue };
            if depth == 0 && stops.contains(c) {
                return i;
            }
            match c {
                '(' | '[' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
        self.tokens.len() - 1
    }

    /// Source text covered by tokens `from..to`, trimmed
    fn raw_between(&self, from: usize, to: usize) -> String {
        if from >= to {
            return String::new();
        }
        let start = self.tokens[from].span.start.byte;
        let end = self.tokens[to - 1].span.end.byte;
        self.source[start..end].trim().to_string()
    }

    /// Like `raw_between`, but a lone string literal yields its unquoted content
    fn value_between(&self, from: usize, to: usize) -> String {
        if to == from + 1 && self.tokens[from].kind == TokenKind::String {
            self.tokens[from].text.clone()
        } else {
            self.raw_between(from, to)
        }
    }

    fn span_between(&self, from: usize, to: usize) -> Span {
        if from >= to {
            return Span::point(self.tokens[from.min(self.tokens.len() - 1)].span.start);
        }
        self.tokens[from].span.to(self.tokens[to - 1].span)
    }

    /// Comma-separated names in `from..to`
    fn names_between(&self, from: usize, to: usize) -> Vec<String> {
        let mut names = Vec::new();
        let mut segment_start = from;
        for i in from..=to {
            if i == to || self.tokens[i].is_punct(',') {
                let name = self.value_between(segment_start, i);
                if !name.is_empty() {
                    names.push(name);
                }
                segment_start = i + 1;
            }
        }
        names
    }

    /// Capture everything between the current `{` and its matching `}`
    /// verbatim. Braces are counted as plain characters. Tokens after the
    /// block are re-lexed so that quotes inside the raw content cannot leak
    /// past its end.
    fn capture_raw_block(&mut self, what: &str) -> Result<(String, Span), ParseError> {
        let open = self.current_span();
        let source = self.source.clone();
        let mut depth = 0usize;
        let mut close = None;
        for (i, byte) in source.bytes().enumerate().skip(open.start.byte) {
            match byte {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let Some(close) = close else {
            return Err(ParseError::new(
                ErrorKind::UnclosedBlock,
                format!("This {} block is never closed", what),
                open,
            )
            .with_help("Raw blocks end at the '}' that balances their opening '{'"));
        };

        let content = source[open.start.byte + 1..close].to_string();
        self.tokens.truncate(self.pos);
        let fresh = Tokenizer::starting_at(&source, position_at(&source, close)).tokenize();
        self.tokens.extend(fresh.into_iter().filter(|t| !t.is_trivia()));
        let close_token = self.advance();
        Ok((content, open.to(close_token.span)))
    }

    /// A literal `<style>` or `<script>` element, kept verbatim as HTML.
    /// Tokens after its closing tag are re-lexed, like after a raw block.
    fn parse_raw_tag(&mut self) -> Option<Node> {
        let open = self.current_span();
        if self.peek().text != "<" {
            return None;
        }
        let source = self.source.clone();
        let end = raw_tag_end(&source, open.start.byte)?;

        // Re-lex from the final `>` so the loop sees one consumed token
        self.tokens.truncate(self.pos);
        let fresh = Tokenizer::starting_at(&source, position_at(&source, end - 1)).tokenize();
        self.tokens.extend(fresh.into_iter().filter(|t| !t.is_trivia()));
        let close = self.advance();

        Some(Node::Origin(OriginNode {
            kind: OriginKind::Html,
            name: None,
            content: source[open.start.byte..end].to_string(),
            span: open.to(close.span),
        }))
    }

    // === Recovery ===

    /// Skip from `start` past the end of the current statement: its `;`, or
    /// its balanced `{ ... }` block. Stops in front of a `}` that closes an
    /// enclosing block.
    fn recover(&mut self, start: usize) {
        self.pos = start;
        let mut depth = 0usize;
        while !self.is_at_end() {
            let token = self.peek();
            if token.is_punct('{') {
                depth += 1;
            } else if token.is_punct('}') {
                if depth == 0 {
                    return;
                }
                depth -= 1;
                if depth == 0 {
                    self.advance();
                    self.eat(';');
                    return;
                }
            } else if token.is_punct(';') && depth == 0 {
                self.advance();
                return;
            }
            self.advance();
        }
    }

    fn skip_statement(&mut self) {
        self.recover(self.pos);
    }

    // === Statements ===

    /// Statements until end of input, or until the `}` of an enclosing namespace
    fn parse_statements(&mut self, nested: bool) -> Vec<Node> {
        let mut nodes = Vec::new();
        loop {
            if self.is_at_end() || (nested && self.check('}')) {
                break;
            }
            let start = self.pos;
            match self.parse_statement() {
                Ok(Some(node)) => nodes.push(node),
                Ok(None) => {}
                Err(err) => {
                    debug!(line = err.line(), message = %err.message, "recovering from syntax error");
                    self.errors.push(err);
                    self.recover(start);
                }
            }
            if self.pos == start && !self.is_at_end() {
                self.advance();
            }
        }
        nodes
    }

    fn parse_statement(&mut self) -> Result<Option<Node>, ParseError> {
        let token = self.peek().clone();

        if token.kind == TokenKind::GeneratorComment {
            self.advance();
            return Ok(Some(Node::Comment(CommentNode { content: token.text, span: token.span })));
        }
        if token.is_punct('[') {
            return self.parse_bracket_statement();
        }
        if token.is_punct('@') {
            return self.parse_element_use().map(Some);
        }
        if self.at_keyword(Keyword::Use) && (self.peek_at(1).is_name() || self.peek_at(1).is_punct('@')) {
            return self.parse_use().map(Some);
        }
        if let Some(node) = self.parse_content_block()? {
            return Ok(Some(node));
        }
        if token.is_name() && (self.peek_at(1).is_punct('{') || self.peek_at(1).is_punct('[')) {
            return self.parse_element().map(|el| Some(Node::Element(el)));
        }
        if token.is_punct('}') {
            return Err(ParseError::new(ErrorKind::UnexpectedToken, "Unmatched '}'", token.span));
        }
        if let Some(node) = self.parse_raw_tag() {
            return Ok(Some(node));
        }

        debug!(line = token.span.start.line + 1, text = %token.text, "skipping unrecognized statement");
        self.skip_statement();
        Ok(None)
    }

    /// `text`, `style` and `script` blocks, shared by documents and element bodies
    fn parse_content_block(&mut self) -> Result<Option<Node>, ParseError> {
        let next = self.peek_at(1).clone();
        if self.at_keyword(Keyword::Text) && (next.is_punct('{') || next.is_punct(':') || next.is_operator("=")) {
            return self.parse_text().map(Some);
        }
        if self.at_keyword(Keyword::Style) && next.is_punct('{') {
            return self.parse_style_block().map(|style| Some(Node::Style(style)));
        }
        if self.at_keyword(Keyword::Script) && next.is_punct('{') {
            return self.parse_script_block().map(|script| Some(Node::Script(script)));
        }
        Ok(None)
    }

    fn parse_text(&mut self) -> Result<Node, ParseError> {
        let keyword = self.advance();

        if self.check('{') {
            if self.peek_at(1).kind == TokenKind::String && self.peek_at(2).is_punct('}') {
                self.advance();
                let literal = self.advance();
                let close = self.advance();
                return Ok(Node::Text(TextNode { content: literal.text, span: keyword.span.to(close.span) }));
            }
            let (content, span) = self.capture_raw_block("text")?;
            return Ok(Node::Text(TextNode {
                content: content.trim().to_string(),
                span: keyword.span.to(span),
            }));
        }

        self.advance(); // ':' or '='
        let (content, span) = self.parse_value()?;
        Ok(Node::Text(TextNode { content, span: keyword.span.to(span) }))
    }

    /// Value after `:` / `=` up to `;` or the enclosing `}`. Consumes the `;`.
    fn parse_value(&mut self) -> Result<(String, Span), ParseError> {
        let from = self.pos;
        let stop = self.find_stop(";{}");
        let value = self.value_between(from, stop);
        let span = self.span_between(from, stop);
        self.pos = stop;
        if self.eat(';') || self.check('}') {
            Ok((value, span))
        } else {
            Err(self.unexpected("Expected ';' after value"))
        }
    }

    fn parse_script_block(&mut self) -> Result<ScriptNode, ParseError> {
        let keyword = self.advance();
        let (content, span) = self.capture_raw_block("script")?;
        Ok(ScriptNode { content: content.trim().to_string(), span: keyword.span.to(span) })
    }

    fn parse_use(&mut self) -> Result<Node, ParseError> {
        let keyword = self.advance();
        let (directive, arguments) = if self.eat('@') {
            let directive = self.expect_name("a directive after '@'")?;
            let (name, _) = self.dotted_name("a configuration name")?;
            (format!("@{}", directive.text), vec![name])
        } else {
            let directive = self.expect_name("a directive after 'use'")?;
            let mut arguments = Vec::new();
            while self.peek().is_name() || matches!(self.peek().kind, TokenKind::String | TokenKind::Number) {
                arguments.push(self.advance().text);
                self.eat(',');
            }
            (directive.text, arguments)
        };
        self.finish_statement(false)?;
        let span = keyword.span.to(self.previous_span());

        if directive == "@Config" {
            let name = arguments.first().cloned().unwrap_or_default();
            if self.context.activate_configuration(&name) {
                self.refresh_keywords();
            } else {
                self.errors.push(
                    ParseError::new(ErrorKind::InvalidSyntax, format!("Unknown configuration '{}'", name), span)
                        .with_help("Declare it first with [Configuration] @Config Name { ... }"),
                );
            }
        }

        Ok(Node::Use(UseNode { directive, arguments, span }))
    }

    fn dotted_name(&mut self, what: &str) -> Result<(String, Span), ParseError> {
        let first = self.expect_name(what)?;
        let mut name = first.text;
        let mut span = first.span;
        while self.check('.') && self.peek_at(1).is_name() {
            self.advance();
            let part = self.advance();
            name.push('.');
            name.push_str(&part.text);
            span = span.to(part.span);
        }
        Ok((name, span))
    }

    /// Optional `[n]` suffix
    fn index_suffix(&mut self) -> Result<Option<usize>, ParseError> {
        if !self.check('[') {
            return Ok(None);
        }
        self.advance();
        let token = self.advance();
        let index = match token.kind {
            TokenKind::Number => token.text.parse::<usize>().ok(),
            _ => None,
        };
        let Some(index) = index else {
            return Err(ParseError::new(
                ErrorKind::InvalidIndex,
                format!("Expected a whole-number index, found '{}'", token.text),
                token.span,
            ));
        };
        self.expect(']', "to close the index")?;
        Ok(Some(index))
    }

    // === Elements ===

    fn parse_element(&mut self) -> Result<ElementNode, ParseError> {
        let tag = self.advance();
        let index = self.index_suffix()?;
        let open = self.expect('{', &format!("to open <{}>", tag.text))?.span;
        let (attributes, children) = self.parse_element_body();
        let close = self.expect_close(open, &format!("<{}>", tag.text))?;

        Ok(ElementNode {
            tag: tag.text,
            attributes,
            children,
            index,
            span: tag.span.to(close.span),
        })
    }

    /// Items up to (not including) the closing `}`
    fn parse_element_body(&mut self) -> (Vec<Attribute>, Vec<Node>) {
        let mut element = ElementNode {
            tag: String::new(),
            attributes: Vec::new(),
            children: Vec::new(),
            index: None,
            span: Span::default(),
        };

        while !self.is_at_end() && !self.check('}') {
            let start = self.pos;
            match self.parse_element_item() {
                Ok(Some(BodyItem::Attribute(attribute))) => element.set_attribute(attribute),
                Ok(Some(BodyItem::Child(node))) => element.children.push(node),
                Ok(None) => {}
                Err(err) => {
                    self.errors.push(err);
                    self.recover(start);
                }
            }
            if self.pos == start && !self.is_at_end() && !self.check('}') {
                self.advance();
            }
        }

        (element.attributes, element.children)
    }

    fn parse_element_item(&mut self) -> Result<Option<BodyItem>, ParseError> {
        let token = self.peek().clone();

        if token.kind == TokenKind::GeneratorComment {
            self.advance();
            return Ok(Some(BodyItem::Child(Node::Comment(CommentNode { content: token.text, span: token.span }))));
        }
        if token.is_punct(';') {
            self.advance();
            return Ok(None);
        }
        if token.is_punct('[') {
            return Ok(self.parse_bracket_statement()?.map(BodyItem::Child));
        }
        if token.is_punct('@') {
            return self.parse_element_use().map(|node| Some(BodyItem::Child(node)));
        }
        if let Some(node) = self.parse_content_block()? {
            return Ok(Some(BodyItem::Child(node)));
        }
        if let Some(node) = self.parse_raw_tag() {
            return Ok(Some(BodyItem::Child(node)));
        }
        if token.is_name() {
            let next = self.peek_at(1).clone();
            if next.is_punct(':') || next.is_operator("=") {
                return self.parse_attribute().map(|a| Some(BodyItem::Attribute(a)));
            }
            if next.is_punct('{') || next.is_punct('[') {
                return self.parse_element().map(|el| Some(BodyItem::Child(Node::Element(el))));
            }
            if next.is_punct(';') {
                self.advance();
                self.advance();
                return Ok(Some(BodyItem::Attribute(Attribute {
                    name: token.text,
                    value: String::new(),
                    span: token.span,
                })));
            }
        }

        Err(self.unexpected("Expected an attribute, text, style, script or child element"))
    }

    fn parse_attribute(&mut self) -> Result<Attribute, ParseError> {
        let name = self.advance();
        self.advance(); // ':' or '='
        let (value, span) = self.parse_value()?;
        Ok(Attribute { name: name.text, value, span: name.span.to(span) })
    }

    fn parse_reference(&mut self, kind: ReferenceKind) -> Result<Reference, ParseError> {
        let start = self.current_span();
        let prefer = self.definition_prefix_ahead();
        if prefer.is_some() {
            self.advance();
            self.advance();
            self.advance();
        }

        let type_keyword = match kind {
            ReferenceKind::Style => Keyword::StyleType,
            ReferenceKind::Element => Keyword::ElementType,
            ReferenceKind::Var => Keyword::VarType,
        };
        if !self.at_type(type_keyword) {
            let expected = self.keywords.spelling(type_keyword).to_string();
            return Err(self.unexpected(&format!("Expected {}", expected)));
        }
        self.advance();
        self.advance();

        let (name, _) = self.dotted_name("a definition name")?;
        let from = if self.at_keyword(Keyword::From) {
            self.advance();
            Some(self.dotted_name("a namespace name after 'from'")?.0)
        } else {
            None
        };

        Ok(Reference { kind, prefer, name, from, span: start.to(self.previous_span()) })
    }

    fn parse_element_use(&mut self) -> Result<Node, ParseError> {
        let start = self.current_span();
        if self.reference_ahead() != Some(ReferenceKind::Element) {
            return Err(self.unexpected(&format!(
                "Expected {} reference",
                self.keywords.spelling(Keyword::ElementType)
            )));
        }
        let reference = self.parse_reference(ReferenceKind::Element)?;
        let index = self.index_suffix()?;

        let mut specialization = if self.check('{') {
            Some(self.parse_element_specialization(&reference)?)
        } else {
            None
        };
        let has_block = specialization.is_some();
        if let Some(index) = index {
            specialization
                .get_or_insert_with(|| Specialization {
                    target: reference.qualified_name(),
                    span: reference.span,
                    ..Default::default()
                })
                .index = Some(index);
        }
        self.finish_statement(has_block)?;

        Ok(Node::ElementUse(ElementUse {
            reference,
            specialization,
            span: start.to(self.previous_span()),
        }))
    }

    fn parse_selector(&mut self) -> Result<ElementSelector, ParseError> {
        let name = self.expect_name("an element name")?;
        let index = self.index_suffix()?;
        Ok(ElementSelector { name: name.text, index, span: name.span.to(self.previous_span()) })
    }

    fn parse_element_specialization(&mut self, reference: &Reference) -> Result<Specialization, ParseError> {
        let open = self.advance().span;
        let mut spec = Specialization { target: reference.qualified_name(), ..Default::default() };

        while !self.is_at_end() && !self.check('}') {
            let start = self.pos;
            if let Err(err) = self.parse_element_edit(&mut spec) {
                self.errors.push(err);
                self.recover(start);
            }
            if self.pos == start && !self.is_at_end() && !self.check('}') {
                self.advance();
            }
        }

        let close = self.expect_close(open, "specialization")?;
        spec.span = open.to(close.span);
        Ok(spec)
    }

    fn parse_element_edit(&mut self, spec: &mut Specialization) -> Result<(), ParseError> {
        let token = self.peek().clone();
        if token.is_punct(';') || token.kind == TokenKind::GeneratorComment {
            self.advance();
            return Ok(());
        }

        if self.at_keyword(Keyword::Delete) {
            self.advance();
            loop {
                match self.reference_ahead() {
                    Some(kind) => {
                        let reference = self.parse_reference(kind)?;
                        spec.delete_inheritance.push(reference.qualified_name());
                    }
                    None => spec.delete_elements.push(self.parse_selector()?),
                }
                if !self.eat(',') {
                    break;
                }
            }
            return self.finish_statement(false);
        }

        if self.at_keyword(Keyword::Insert) {
            let keyword = self.advance();
            let (position, target) = if self.at_keyword(Keyword::Before) {
                self.advance();
                (InsertPosition::Before, Some(self.parse_selector()?))
            } else if self.at_keyword(Keyword::After) {
                self.advance();
                (InsertPosition::After, Some(self.parse_selector()?))
            } else if self.at_keyword(Keyword::Replace) {
                self.advance();
                (InsertPosition::Replace, Some(self.parse_selector()?))
            } else if self.peek().is_word("at") && self.peek_at(1).is_word("top") {
                self.advance();
                self.advance();
                (InsertPosition::AtTop, None)
            } else if self.peek().is_word("at") && self.peek_at(1).is_word("bottom") {
                self.advance();
                self.advance();
                (InsertPosition::AtBottom, None)
            } else {
                return Err(self
                    .unexpected("Expected before, after, replace, at top or at bottom")
                    .with_related(keyword.span)
                    .with_related_label("insert starts here"));
            };

            let open = self.expect('{', "to open the inserted content")?.span;
            let (attributes, content) = self.parse_element_body();
            let close = self.expect_close(open, "insert")?;
            self.eat(';');
            if !attributes.is_empty() {
                self.errors.push(
                    ParseError::new(ErrorKind::InvalidSyntax, "Inserted content cannot carry attributes", open)
                        .with_help("Wrap attributes in an element: insert after div { span { class: x; } }"),
                );
            }
            spec.inserts.push(InsertOp { position, target, content, span: keyword.span.to(close.span) });
            return Ok(());
        }

        if token.is_name() && (self.peek_at(1).is_punct('{') || self.peek_at(1).is_punct('[')) {
            let selector = self.parse_selector()?;
            let open = self.expect('{', "to open the element patch")?.span;
            let (attributes, children) = self.parse_element_body();
            let close = self.expect_close(open, "patch")?;
            spec.patches.push(ElementPatch { span: selector.span.to(close.span), selector, attributes, children });
            return Ok(());
        }

        Err(self.unexpected("Expected delete, insert or an element patch"))
    }

    // === Styles ===

    fn parse_style_block(&mut self) -> Result<StyleNode, ParseError> {
        let keyword = self.advance();
        let open = self.expect('{', "to open the style block")?.span;
        let items = self.parse_style_items();
        let close = self.expect_close(open, "style")?;
        Ok(StyleNode { items, span: keyword.span.to(close.span) })
    }

    /// Items up to (not including) the closing `}`
    fn parse_style_items(&mut self) -> Vec<StyleItem> {
        let mut items = Vec::new();
        while !self.is_at_end() && !self.check('}') {
            let start = self.pos;
            match self.parse_style_item() {
                Ok(parsed) => items.extend(parsed),
                Err(err) => {
                    self.errors.push(err);
                    self.recover(start);
                }
            }
            if self.pos == start && !self.is_at_end() && !self.check('}') {
                self.advance();
            }
        }
        items
    }

    fn parse_style_item(&mut self) -> Result<Vec<StyleItem>, ParseError> {
        let token = self.peek().clone();

        if token.is_punct(';') || token.kind == TokenKind::GeneratorComment {
            self.advance();
            return Ok(Vec::new());
        }
        if self.reference_ahead() == Some(ReferenceKind::Style) {
            return Ok(vec![StyleItem::Use(self.parse_style_use()?)]);
        }
        if self.at_keyword(Keyword::Inherit) {
            self.advance();
            return Ok(vec![StyleItem::Use(self.parse_style_use()?)]);
        }
        if self.at_keyword(Keyword::Delete) {
            return Ok(vec![StyleItem::Delete(self.parse_deletion()?)]);
        }
        if self.constraint_ahead() {
            return Ok(vec![StyleItem::Constraint(self.parse_constraint()?)]);
        }

        let stop = self.find_stop(";{}");
        if self.tokens[stop].is_punct('{') {
            return Ok(vec![StyleItem::Rule(self.parse_style_rule(stop)?)]);
        }
        self.parse_declarations(stop)
    }

    /// `prop: value;`, or valueless `a, b;`
    fn parse_declarations(&mut self, stop: usize) -> Result<Vec<StyleItem>, ParseError> {
        let from = self.pos;
        let colon = (from..stop).find(|&i| self.tokens[i].is_punct(':'));
        let items = match colon {
            Some(colon) => {
                let name = self.raw_between(from, colon);
                if name.is_empty() {
                    return Err(self.unexpected("Expected a property name"));
                }
                vec![StyleItem::Declaration(Property {
                    name,
                    value: Some(self.raw_between(colon + 1, stop)),
                    span: self.span_between(from, stop),
                })]
            }
            None => self
                .names_between(from, stop)
                .into_iter()
                .map(|name| {
                    StyleItem::Declaration(Property { name, value: None, span: self.span_between(from, stop) })
                })
                .collect(),
        };
        self.pos = stop;
        self.finish_statement(false)?;
        Ok(items)
    }

    fn parse_style_rule(&mut self, brace: usize) -> Result<StyleRule, ParseError> {
        let from = self.pos;
        let selector = self.raw_between(from, brace);
        if selector.is_empty() {
            return Err(self.unexpected("Expected a selector before '{'"));
        }
        self.pos = brace;
        let open = self.advance().span;
        let items = self.parse_style_items();
        let close = self.expect_close(open, &format!("'{}'", selector))?;
        Ok(StyleRule { selector, items, span: self.tokens[from].span.to(close.span) })
    }

    fn parse_style_use(&mut self) -> Result<StyleUse, ParseError> {
        let reference = self.parse_reference(ReferenceKind::Style)?;
        let specialization = if self.check('{') {
            Some(self.parse_style_specialization(&reference)?)
        } else {
            None
        };
        self.finish_statement(specialization.is_some())?;
        Ok(StyleUse { span: reference.span.to(self.previous_span()), reference, specialization })
    }

    fn parse_style_specialization(&mut self, reference: &Reference) -> Result<Specialization, ParseError> {
        let open = self.advance().span;
        let mut spec = Specialization { target: reference.qualified_name(), ..Default::default() };

        while !self.is_at_end() && !self.check('}') {
            let start = self.pos;
            if let Err(err) = self.parse_style_edit(&mut spec) {
                self.errors.push(err);
                self.recover(start);
            }
            if self.pos == start && !self.is_at_end() && !self.check('}') {
                self.advance();
            }
        }

        let close = self.expect_close(open, "specialization")?;
        spec.span = open.to(close.span);
        Ok(spec)
    }

    fn parse_style_edit(&mut self, spec: &mut Specialization) -> Result<(), ParseError> {
        let token = self.peek().clone();
        if token.is_punct(';') || token.kind == TokenKind::GeneratorComment {
            self.advance();
            return Ok(());
        }
        if self.at_keyword(Keyword::Delete) {
            let deletion = self.parse_deletion()?;
            spec.delete_properties.extend(deletion.properties);
            spec.delete_inheritance.extend(deletion.inheritance);
            return Ok(());
        }

        let from = self.pos;
        let stop = self.find_stop(";{}");
        if self.tokens[stop].is_punct('{') {
            self.pos = stop;
            return Err(self.unexpected("Nested blocks are not allowed in a style specialization"));
        }
        let Some(colon) = (from..stop).find(|&i| self.tokens[i].is_punct(':')) else {
            return Err(self.unexpected("Expected 'property: value;' or 'delete'"));
        };
        spec.overrides.push(Property {
            name: self.raw_between(from, colon),
            value: Some(self.raw_between(colon + 1, stop)),
            span: self.span_between(from, stop),
        });
        self.pos = stop;
        self.finish_statement(false)
    }

    /// `delete a, b;` / `delete @Style Base;`
    fn parse_deletion(&mut self) -> Result<Deletion, ParseError> {
        let keyword = self.advance();
        let mut deletion = Deletion { properties: Vec::new(), inheritance: Vec::new(), span: keyword.span };

        loop {
            if let Some(kind) = self.reference_ahead() {
                let reference = self.parse_reference(kind)?;
                deletion.inheritance.push(reference.qualified_name());
            } else {
                let from = self.pos;
                let stop = self.find_stop(",;{}");
                let name = self.raw_between(from, stop);
                if name.is_empty() {
                    return Err(self.unexpected(&format!("Expected a name after '{}'", keyword.text)));
                }
                deletion.properties.push(name);
                self.pos = stop;
            }
            if !self.eat(',') {
                break;
            }
        }

        self.finish_statement(false)?;
        deletion.span = keyword.span.to(self.previous_span());
        Ok(deletion)
    }

    /// `Name except ...` or `NS.Name except ...`
    fn constraint_ahead(&self) -> bool {
        let mut offset = 0;
        if !self.peek_at(offset).is_name() {
            return false;
        }
        while self.peek_at(offset + 1).is_punct('.') && self.peek_at(offset + 2).is_name() {
            offset += 2;
        }
        let next = self.peek_at(offset + 1);
        next.is_name() && self.keywords.matches(Keyword::Except, &next.text)
    }

    fn parse_constraint(&mut self) -> Result<Constraint, ParseError> {
        let (target, target_span) = self.dotted_name("a constraint target")?;
        self.advance(); // except

        let scope = if self.peek().is_word("type") {
            self.advance();
            ConstraintScope::Type
        } else if self.peek().is_word("global") {
            self.advance();
            ConstraintScope::Global
        } else {
            ConstraintScope::Exact
        };

        let mut names = Vec::new();
        if self.check('{') {
            let open = self.advance().span;
            while !self.is_at_end() && !self.check('}') {
                let from = self.pos;
                let stop = self.find_stop(";{}");
                if self.tokens[stop].is_punct('{') {
                    self.pos = stop;
                    return Err(self.unexpected("Expected a property or element name"));
                }
                let end = (from..stop).find(|&i| self.tokens[i].is_punct(':')).unwrap_or(stop);
                names.extend(self.names_between(from, end));
                self.pos = stop;
                self.eat(';');
                if self.pos == from {
                    break;
                }
            }
            self.expect_close(open, "constraint")?;
            self.eat(';');
        } else {
            let from = self.pos;
            let stop = self.find_stop(";{}");
            names.extend(self.names_between(from, stop));
            self.pos = stop;
            self.finish_statement(false)?;
        }

        let constraint = Constraint { target, scope, names, span: target_span.to(self.previous_span()) };
        if scope != ConstraintScope::Exact {
            self.context.add_constraint(constraint.clone());
        }
        Ok(constraint)
    }

    // === Bracket statements ===

    fn parse_bracket_statement(&mut self) -> Result<Option<Node>, ParseError> {
        let open = self.advance();
        let word = self.expect_name("a block type after '['")?;

        match word.text.as_str() {
            "Template" | "Custom" => {
                self.expect(']', "after the block type")?;
                let kind = if word.text == "Template" { DefinitionKind::Template } else { DefinitionKind::Custom };
                self.parse_definition(kind, open.span).map(Some)
            }
            "Namespace" => {
                self.expect(']', "after Namespace")?;
                self.parse_namespace(open.span).map(Some)
            }
            "Configuration" => {
                self.expect(']', "after Configuration")?;
                self.parse_configuration(open.span).map(Some)
            }
            "Import" => {
                self.expect(']', "after Import")?;
                self.parse_import(open.span).map(Some)
            }
            "Origin" => self.parse_origin(open.span).map(Some),
            other => {
                debug!(block = other, "skipping unsupported bracket block");
                while !self.is_at_end() && !self.check(']') {
                    self.advance();
                }
                self.eat(']');
                self.skip_statement();
                Ok(None)
            }
        }
    }

    fn parse_definition(&mut self, kind: DefinitionKind, start: Span) -> Result<Node, ParseError> {
        let reference_kind = match self.reference_ahead() {
            Some(k) if self.check('@') => k,
            _ => return Err(self.unexpected("Expected @Style, @Element or @Var")),
        };
        self.advance();
        self.advance();
        let name = self.expect_name("a definition name")?;
        let open = self.expect('{', &format!("to open the body of '{}'", name.text))?.span;
        let scope = self.scope_path();

        let node = match reference_kind {
            ReferenceKind::Style => {
                let items = self.parse_style_items();
                let close = self.expect_close(open, &format!("'{}'", name.text))?;
                let definition = StyleDefinition { name: name.text, scope, items, span: start.to(close.span) };
                let replaced = self.context.register_style(kind, definition.clone());
                self.note_redefinition(replaced, &definition.name, definition.span);
                match kind {
                    DefinitionKind::Template => Node::StyleTemplate(definition),
                    DefinitionKind::Custom => Node::CustomStyle(definition),
                }
            }
            ReferenceKind::Element => {
                let (attributes, children) = self.parse_element_body();
                let close = self.expect_close(open, &format!("'{}'", name.text))?;
                if let Some(attribute) = attributes.first() {
                    self.errors.push(
                        ParseError::new(
                            ErrorKind::InvalidSyntax,
                            "Element templates hold elements, not attributes",
                            attribute.span,
                        )
                        .with_help("Move the attribute into one of the template's elements"),
                    );
                }
                let definition = ElementDefinition { name: name.text, scope, children, span: start.to(close.span) };
                let replaced = self.context.register_element(kind, definition.clone());
                self.note_redefinition(replaced, &definition.name, definition.span);
                match kind {
                    DefinitionKind::Template => Node::ElementTemplate(definition),
                    DefinitionKind::Custom => Node::CustomElement(definition),
                }
            }
            ReferenceKind::Var => {
                let (entries, inherits) = self.parse_var_body();
                let close = self.expect_close(open, &format!("'{}'", name.text))?;
                let definition = VarDefinition {
                    name: name.text,
                    scope,
                    entries,
                    inherits,
                    span: start.to(close.span),
                };
                let replaced = self.context.register_var(kind, definition.clone());
                self.note_redefinition(replaced, &definition.name, definition.span);
                match kind {
                    DefinitionKind::Template => Node::VarTemplate(definition),
                    DefinitionKind::Custom => Node::CustomVar(definition),
                }
            }
        };

        Ok(node)
    }

    fn note_redefinition(&self, replaced: bool, name: &str, span: Span) {
        if replaced {
            debug!(name, line = span.start.line + 1, "definition replaces an earlier one with the same name");
        }
    }

    fn parse_var_body(&mut self) -> (Vec<Property>, Vec<Reference>) {
        let mut entries = Vec::new();
        let mut inherits = Vec::new();

        while !self.is_at_end() && !self.check('}') {
            let start = self.pos;
            let result = if self.reference_ahead() == Some(ReferenceKind::Var) || self.at_keyword(Keyword::Inherit) {
                if self.at_keyword(Keyword::Inherit) {
                    self.advance();
                }
                self.parse_reference(ReferenceKind::Var)
                    .and_then(|reference| self.finish_statement(false).map(|_| inherits.push(reference)))
            } else {
                self.parse_var_entry().map(|parsed| entries.extend(parsed))
            };
            if let Err(err) = result {
                self.errors.push(err);
                self.recover(start);
            }
            if self.pos == start && !self.is_at_end() && !self.check('}') {
                self.advance();
            }
        }

        (entries, inherits)
    }

    fn parse_var_entry(&mut self) -> Result<Vec<Property>, ParseError> {
        let from = self.pos;
        let stop = self.find_stop(";{}");
        if self.tokens[stop].is_punct('{') {
            self.pos = stop;
            return Err(self.unexpected("Expected 'name: value;'"));
        }
        let span = self.span_between(from, stop);
        let entries = match (from..stop).find(|&i| self.tokens[i].is_punct(':') || self.tokens[i].is_operator("=")) {
            Some(colon) => vec![Property {
                name: self.raw_between(from, colon),
                value: Some(self.value_between(colon + 1, stop)),
                span,
            }],
            None => self
                .names_between(from, stop)
                .into_iter()
                .map(|name| Property { name, value: None, span })
                .collect(),
        };
        self.pos = stop;
        self.finish_statement(false)?;
        Ok(entries)
    }

    fn parse_namespace(&mut self, start: Span) -> Result<Node, ParseError> {
        let name = self.expect_name("a namespace name")?;
        let parent = if self.scope.is_empty() { None } else { Some(self.scope_path()) };
        self.scope.push(name.text.clone());
        let path = self.scope_path();
        self.context.declare_namespace(&path);

        let result = if self.check('{') {
            let open = self.advance().span;
            let children = self.parse_statements(true);
            self.expect_close(open, &format!("namespace '{}'", name.text)).map(|close| (children, close.span))
        } else {
            self.finish_statement(false).map(|_| (Vec::new(), self.previous_span()))
        };
        self.scope.pop();
        let (children, end) = result?;

        Ok(Node::Namespace(NamespaceNode { name: name.text, path, parent, children, span: start.to(end) }))
    }

    fn parse_configuration(&mut self, start: Span) -> Result<Node, ParseError> {
        let name = if self.check('@') && self.peek_at(1).is_word("Config") {
            self.advance();
            self.advance();
            Some(self.expect_name("a configuration name")?.text)
        } else {
            None
        };
        let open = self.expect('{', "to open the configuration block")?.span;

        let mut settings = Vec::new();
        let mut name_map = Vec::new();
        while !self.is_at_end() && !self.check('}') {
            let begin = self.pos;
            if let Err(err) = self.parse_configuration_entry(&mut settings, &mut name_map) {
                self.errors.push(err);
                self.recover(begin);
            }
            if self.pos == begin && !self.is_at_end() && !self.check('}') {
                self.advance();
            }
        }
        let close = self.expect_close(open, "configuration")?;

        let node = ConfigurationNode { name, settings, name_map, span: start.to(close.span) };
        self.context.register_configuration(ConfigurationInfo::from_node(&node));
        self.refresh_keywords();
        Ok(Node::Configuration(node))
    }

    fn parse_configuration_entry(
        &mut self,
        settings: &mut Vec<(String, String)>,
        name_map: &mut Vec<(String, Vec<String>)>,
    ) -> Result<(), ParseError> {
        if self.eat('[') {
            let section = self.expect_name("a configuration section name")?;
            self.expect(']', "after the section name")?;
            if section.text != "Name" {
                debug!(section = %section.text, "ignoring configuration section");
                self.skip_statement();
                return Ok(());
            }
            let open = self.expect('{', "to open the [Name] section")?.span;
            while !self.is_at_end() && !self.check('}') {
                let begin = self.pos;
                match self.parse_setting() {
                    Ok(entry) => name_map.push(entry),
                    Err(err) => {
                        self.errors.push(err);
                        self.recover(begin);
                    }
                }
                if self.pos == begin && !self.is_at_end() && !self.check('}') {
                    self.advance();
                }
            }
            self.expect_close(open, "[Name]")?;
            return Ok(());
        }

        let (key, values) = self.parse_setting()?;
        settings.push((key, values.join(", ")));
        Ok(())
    }

    /// `KEY = value;` or `KEY = [a, b];`
    fn parse_setting(&mut self) -> Result<(String, Vec<String>), ParseError> {
        let key = self.expect_name("a setting name")?;
        if !(self.eat(':') || self.peek().is_operator("=")) {
            return Err(self.unexpected(&format!("Expected '=' after '{}'", key.text)));
        }
        if self.peek().is_operator("=") {
            self.advance();
        }

        let values = if self.eat('[') {
            let from = self.pos;
            let stop = self.find_stop("];{}");
            let values = self.names_between(from, stop);
            self.pos = stop;
            self.expect(']', "to close the value group")?;
            values
        } else {
            let from = self.pos;
            let stop = self.find_stop(";{}");
            let value = self.value_between(from, stop);
            self.pos = stop;
            vec![value]
        };
        self.finish_statement(false)?;
        Ok((key.text, values))
    }

    fn parse_import(&mut self, start: Span) -> Result<Node, ParseError> {
        let mut kind = self.definition_prefix_ahead().map(|k| match k {
            DefinitionKind::Template => "[Template]".to_string(),
            DefinitionKind::Custom => "[Custom]".to_string(),
        });
        if kind.is_some() {
            self.advance();
            self.advance();
            self.advance();
        }
        if self.check('@') && self.peek_at(1).is_name() {
            self.advance();
            let k = self.advance();
            kind = Some(match kind {
                Some(prefix) => format!("{} @{}", prefix, k.text),
                None => format!("@{}", k.text),
            });
        }

        let target = if self.peek().kind == TokenKind::String {
            self.advance().text
        } else if self.peek().is_name() && !self.at_keyword(Keyword::From) {
            self.dotted_name("an import target")?.0
        } else {
            String::new()
        };
        let from = if self.at_keyword(Keyword::From) {
            self.advance();
            if self.peek().kind == TokenKind::String {
                Some(self.advance().text)
            } else {
                Some(self.dotted_name("an import source")?.0)
            }
        } else {
            None
        };
        let alias = if self.at_keyword(Keyword::As) {
            self.advance();
            Some(self.expect_name("an alias after 'as'")?.text)
        } else {
            None
        };

        if target.is_empty() && from.is_none() {
            return Err(self.unexpected("Expected an import target"));
        }
        self.finish_statement(false)?;

        let node = ImportNode { kind, target, from, alias, span: start.to(self.previous_span()) };
        self.context.register_import(ImportInfo::from(&node));
        Ok(Node::Import(node))
    }

    /// `[Origin] @Html name? { raw }`, `[Origin Html] { raw }`, or `[Origin] @Html name;`
    fn parse_origin(&mut self, start: Span) -> Result<Node, ParseError> {
        let kind_token = if self.eat(']') {
            self.expect('@', "before the origin type")?;
            self.expect_name("an origin type")?
        } else {
            let token = self.expect_name("an origin type")?;
            self.expect(']', "to close the origin header")?;
            token
        };
        let kind = OriginKind::from_name(&kind_token.text).ok_or_else(|| {
            ParseError::new(
                ErrorKind::InvalidSyntax,
                format!("Unknown origin type '{}'", kind_token.text),
                kind_token.span,
            )
            .with_help("Use @Html, @Style or @JavaScript")
        })?;
        let name = if self.peek().is_name() { Some(self.advance().text) } else { None };

        if self.check('{') {
            let (content, span) = self.capture_raw_block("origin")?;
            let node = OriginNode { kind, name, content: content.trim().to_string(), span: start.to(span) };
            let scope = self.scope_path();
            self.context.register_origin(&scope, node.clone());
            return Ok(Node::Origin(node));
        }

        let Some(name) = name else {
            return Err(self.unexpected("Expected '{' or an origin name"));
        };
        self.finish_statement(false)?;
        Ok(Node::OriginUse(OriginUse { kind, name, span: start.to(self.previous_span()) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::tokenizer::tokenize;

    fn build(source: &str) -> BuildOutput {
        TreeBuilder::new(tokenize(source), Arc::from(source)).build()
    }

    fn element(node: &Node) -> &ElementNode {
        match node {
            Node::Element(el) => el,
            other => panic!("expected element, got {:?}", other),
        }
    }

    #[test]
    fn test_element_with_attributes_and_text() {
        let out = build(r#"div { id: main; class = "box big"; text { "Hello" } }"#);
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        let div = element(&out.nodes[0]);
        assert_eq!(div.tag, "div");
        assert_eq!(div.attribute("id"), Some("main"));
        assert_eq!(div.attribute("class"), Some("box big"));
        assert!(matches!(&div.children[0], Node::Text(t) if t.content == "Hello"));
    }

    #[test]
    fn test_unquoted_text_block_is_raw() {
        let out = build("p { text { It's a sunny day } }");
        let p = element(&out.nodes[0]);
        assert!(matches!(&p.children[0], Node::Text(t) if t.content == "It's a sunny day"));
    }

    #[test]
    fn test_text_attribute_form() {
        let out = build(r#"span { text: "hi"; }"#);
        let span = element(&out.nodes[0]);
        assert!(matches!(&span.children[0], Node::Text(t) if t.content == "hi"));
    }

    #[test]
    fn test_element_index() {
        let out = build("div[2] { }");
        assert_eq!(element(&out.nodes[0]).index, Some(2));
    }

    #[test]
    fn test_style_block_declarations_and_rules() {
        let out = build("div { style { width: 100px + 20px; .box { color: red; } &:hover { color: blue; } } }");
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        let div = element(&out.nodes[0]);
        let Node::Style(style) = &div.children[0] else { panic!("expected style") };
        assert!(matches!(&style.items[0], StyleItem::Declaration(p)
            if p.name == "width" && p.value.as_deref() == Some("100px + 20px")));
        assert!(matches!(&style.items[1], StyleItem::Rule(r) if r.selector == ".box"));
        assert!(matches!(&style.items[2], StyleItem::Rule(r) if r.selector == "&:hover"));
    }

    #[test]
    fn test_conditional_value_keeps_colons() {
        let out = build("div { style { color: width > 50px ? red : blue; } }");
        let div = element(&out.nodes[0]);
        let Node::Style(style) = &div.children[0] else { panic!("expected style") };
        assert!(matches!(&style.items[0], StyleItem::Declaration(p)
            if p.value.as_deref() == Some("width > 50px ? red : blue")));
    }

    #[test]
    fn test_template_registered_immediately() {
        let out = build("[Template] @Style Button { color: red; font-size: 16px; }");
        assert!(matches!(&out.nodes[0], Node::StyleTemplate(d) if d.name == "Button" && d.items.len() == 2));
        let reference = Reference {
            kind: ReferenceKind::Style,
            prefer: None,
            name: "Button".to_string(),
            from: None,
            span: Span::default(),
        };
        assert!(out.context.lookup_style(&reference, "").is_some());
    }

    #[test]
    fn test_style_reference_with_specialization() {
        let out = build("div { style { @Style Base { delete color, margin; delete @Style Other; padding: 4px; } } }");
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        let div = element(&out.nodes[0]);
        let Node::Style(style) = &div.children[0] else { panic!("expected style") };
        let StyleItem::Use(style_use) = &style.items[0] else { panic!("expected use") };
        let spec = style_use.specialization.as_ref().unwrap();
        assert_eq!(spec.delete_properties, vec!["color", "margin"]);
        assert_eq!(spec.delete_inheritance, vec!["Other"]);
        assert_eq!(spec.overrides[0].name, "padding");
        assert_eq!(spec.overrides[0].value.as_deref(), Some("4px"));
    }

    #[test]
    fn test_element_specialization_operations() {
        let source = "body { @Element Card { delete span[1]; insert after div[0] { p { } } insert at bottom { hr { } } div[0] { class: first; } } }";
        let out = build(source);
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        let body = element(&out.nodes[0]);
        let Node::ElementUse(use_node) = &body.children[0] else { panic!("expected element use") };
        let spec = use_node.specialization.as_ref().unwrap();
        assert_eq!(spec.delete_elements[0].name, "span");
        assert_eq!(spec.delete_elements[0].index, Some(1));
        assert_eq!(spec.inserts[0].position, InsertPosition::After);
        assert_eq!(spec.inserts[0].target.as_ref().unwrap().index, Some(0));
        assert_eq!(spec.inserts[1].position, InsertPosition::AtBottom);
        assert_eq!(spec.patches[0].attributes[0].value, "first");
    }

    #[test]
    fn test_indexed_element_use() {
        let out = build("@Element Card[1];");
        let Node::ElementUse(use_node) = &out.nodes[0] else { panic!("expected element use") };
        assert_eq!(use_node.specialization.as_ref().and_then(|s| s.index), Some(1));
    }

    #[test]
    fn test_qualified_reference_forms() {
        let out = build("div { style { @Style UI.Button; @Style Button from UI; [Custom] @Style Box; } }");
        let div = element(&out.nodes[0]);
        let Node::Style(style) = &div.children[0] else { panic!("expected style") };
        let refs: Vec<(String, Option<DefinitionKind>)> = style
            .items
            .iter()
            .filter_map(|i| match i {
                StyleItem::Use(u) => Some((u.reference.qualified_name(), u.reference.prefer)),
                _ => None,
            })
            .collect();
        assert_eq!(
            refs,
            vec![
                ("UI.Button".to_string(), None),
                ("UI.Button".to_string(), None),
                ("Box".to_string(), Some(DefinitionKind::Custom)),
            ]
        );
    }

    #[test]
    fn test_namespace_scopes_definitions() {
        let out = build("[Namespace] UI { [Namespace] Forms { [Template] @Style Input { border: none; } } }");
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        let Node::Namespace(ui) = &out.nodes[0] else { panic!("expected namespace") };
        let Node::Namespace(forms) = &ui.children[0] else { panic!("expected namespace") };
        assert_eq!(forms.path, "UI.Forms");
        assert_eq!(forms.parent.as_deref(), Some("UI"));
        assert!(matches!(&forms.children[0], Node::StyleTemplate(d) if d.scope == "UI.Forms"));
    }

    #[test]
    fn test_constraint_scopes() {
        let out = build(
            "[Template] @Style Card { Base except { color; font-size: 1px; } Other except global { margin; } }",
        );
        let Node::StyleTemplate(def) = &out.nodes[0] else { panic!("expected template") };
        let StyleItem::Constraint(exact) = &def.items[0] else { panic!("expected constraint") };
        assert_eq!(exact.scope, ConstraintScope::Exact);
        assert_eq!(exact.names, vec!["color", "font-size"]);
        let StyleItem::Constraint(global) = &def.items[1] else { panic!("expected constraint") };
        assert_eq!(global.scope, ConstraintScope::Global);
        assert_eq!(out.context.constraints_for("Anything").count(), 1);
    }

    #[test]
    fn test_configuration_remaps_keywords() {
        let source = "[Configuration] { INDEX_INITIAL_COUNT = 1; [Name] { KEYWORD_DELETE = [remove, drop]; } }\n\
                      [Custom] @Style Box { color: red; remove color; }";
        let out = build(source);
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        assert_eq!(out.context.index_base(), 1);
        let Node::CustomStyle(def) = &out.nodes[1] else { panic!("expected custom") };
        assert!(matches!(&def.items[1], StyleItem::Delete(d) if d.properties == vec!["color"]));
    }

    #[test]
    fn test_origin_block_and_use() {
        let source = "[Origin] @Html banner { <div class=\"x\">it's raw {}</div> }\nbody { [Origin] @Html banner; }";
        let out = build(source);
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        assert!(matches!(&out.nodes[0], Node::Origin(o)
            if o.kind == OriginKind::Html && o.content == "<div class=\"x\">it's raw {}</div>"));
        let body = element(&out.nodes[1]);
        assert!(matches!(&body.children[0], Node::OriginUse(u) if u.name == "banner"));
        assert_eq!(out.context.origin_embeds().len(), 1);
    }

    #[test]
    fn test_legacy_origin_header() {
        let out = build("[Origin Style] { .a { color: red; } }");
        assert!(matches!(&out.nodes[0], Node::Origin(o) if o.kind == OriginKind::Style));
    }

    #[test]
    fn test_raw_style_tag_keeps_next_element() {
        let out = build("<style>.a { color: red; }</style>\ndiv { }");
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        assert_eq!(out.nodes.len(), 2);
        assert!(matches!(&out.nodes[0], Node::Origin(o) if o.content == "<style>.a { color: red; }</style>"));
        assert_eq!(element(&out.nodes[1]).tag, "div");
    }

    #[test]
    fn test_raw_script_tag_inside_element() {
        let out = build("body { <script>go();</script> p { } }");
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        let body = element(&out.nodes[0]);
        assert_eq!(body.children.len(), 2);
        assert!(matches!(&body.children[0], Node::Origin(o) if o.kind == OriginKind::Html));
    }

    #[test]
    fn test_import_and_use() {
        let out = build("use html5;\n[Import] @Chtl from \"ui.chtl\" as UI;\n[Import] Widgets;");
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        assert!(matches!(&out.nodes[0], Node::Use(u) if u.directive == "html5"));
        assert!(matches!(&out.nodes[1], Node::Import(i)
            if i.kind.as_deref() == Some("@Chtl") && i.from.as_deref() == Some("ui.chtl") && i.alias.as_deref() == Some("UI")));
        assert_eq!(out.context.imports().len(), 2);
    }

    #[test]
    fn test_script_block_is_raw() {
        let out = build("div { script { const o = { a: 'it''s' }; if (x) { y(); } } }");
        let div = element(&out.nodes[0]);
        assert!(matches!(&div.children[0], Node::Script(s)
            if s.content == "const o = { a: 'it''s' }; if (x) { y(); }"));
    }

    #[test]
    fn test_recovers_after_syntax_error() {
        let out = build("div { id main; }\nspan { }");
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].line(), 1);
        assert_eq!(out.nodes.len(), 2);
        assert_eq!(element(&out.nodes[1]).tag, "span");
    }

    #[test]
    fn test_unclosed_block_reported() {
        let out = build("div { span { }");
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].kind, ErrorKind::UnclosedBlock);
    }

    #[test]
    fn test_unknown_statements_skipped() {
        let out = build("; 42 [Info] { version = 1; } div { }");
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        assert_eq!(out.nodes.len(), 1);
    }

    #[test]
    fn test_generator_comment_node() {
        let out = build("# heading\ndiv { }");
        assert!(matches!(&out.nodes[0], Node::Comment(c) if c.content == "heading"));
    }

    #[test]
    fn test_var_template() {
        let out = build("[Template] @Var Theme { primary: \"blue\"; accent: rgb(1, 2, 3); }");
        let Node::VarTemplate(def) = &out.nodes[0] else { panic!("expected var template") };
        assert_eq!(def.entries[0].value.as_deref(), Some("blue"));
        assert_eq!(def.entries[1].value.as_deref(), Some("rgb(1, 2, 3)"));
    }

    #[test]
    fn test_valueless_custom_properties() {
        let out = build("[Custom] @Style Text { color, font-size; }");
        let Node::CustomStyle(def) = &out.nodes[0] else { panic!("expected custom") };
        assert_eq!(def.items.len(), 2);
        assert!(matches!(&def.items[1], StyleItem::Declaration(p) if p.name == "font-size" && p.value.is_none()));
    }
}
