pub mod keywords;
pub mod positions;
pub mod tokenizer;
mod tree_builder;

pub use positions::position_at;
pub use tokenizer::{Position, Span, Token, TokenKind, tokenize};
use tree_builder::TreeBuilder;

use crate::ast::Ast;
use crate::context::CompilationContext;
use crate::error::ParseError;
use std::sync::Arc;
use tracing::debug;

/// AST plus the symbol tables registered while building it
#[derive(Debug)]
pub struct ParsedDocument {
    pub ast: Ast,
    pub context: CompilationContext,
    /// Syntax errors the builder recovered from, in source order
    pub errors: Vec<ParseError>,
}

/// Parser trait - converts source code to an AST and its compilation context
pub trait Parser {
    /// Fails on the first syntax error
    fn parse(&self, source: &str) -> Result<ParsedDocument, ParseError> {
        let mut document = self.parse_recovering(source);
        if document.errors.is_empty() {
            Ok(document)
        } else {
            Err(document.errors.remove(0))
        }
    }

    /// Never fails; malformed statements are skipped and reported in `errors`
    fn parse_recovering(&self, source: &str) -> ParsedDocument;
}

/// CHTL document parser
pub struct ChtlParser {
    // Configuration only, no state
}

impl ChtlParser {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for ChtlParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for ChtlParser {
    fn parse_recovering(&self, source: &str) -> ParsedDocument {
        let tokens = tokenize(source);
        debug!(tokens = tokens.len(), "tokenized");

        let source_arc: Arc<str> = Arc::from(source);
        let output = TreeBuilder::new(tokens, source_arc.clone()).build();

        ParsedDocument {
            ast: Ast::new(output.nodes, source_arc),
            context: output.context,
            errors: output.errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_parse_returns_first_error() {
        let err = ChtlParser::new().parse("div { id main; }\np { class x; }").unwrap_err();
        assert_eq!(err.line(), 1);
    }

    #[test]
    fn test_recovering_parse_keeps_going() {
        let doc = ChtlParser::new().parse_recovering("div { id main; }\np { class x; }");
        assert_eq!(doc.errors.len(), 2);
        assert_eq!(doc.ast.nodes.len(), 2);
    }

    #[test]
    fn test_clean_parse() {
        let doc = ChtlParser::new().parse("html { body { text { \"hi\" } } }").unwrap();
        assert_eq!(doc.ast.nodes.len(), 1);
        assert!(doc.errors.is_empty());
    }
}
