mod html;
mod output;

pub use html::HtmlGenerator;
pub use output::Output;

use crate::ast::Ast;
use crate::context::CompilationContext;
use crate::error::GenerateFailure;
use serde::Serialize;

/// Generation result: one string per output channel
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerateResult {
    pub html: String,
    pub css: String,
    pub js: String,
    pub warnings: Vec<String>,
}

/// Generator trait - converts AST to HTML, CSS and JS
pub trait Generator {
    fn generate(&self, ast: &Ast, context: &CompilationContext) -> Result<GenerateResult, GenerateFailure>;
}
