//! CHTL compiler.
//!
//! A CHTL document mixes the template language with CSS, JavaScript and the
//! script extension. Compilation runs in stages:
//!
//! 1. [`scanner`] cuts the document at sublanguage boundaries and replaces
//!    each embedded span with a placeholder id.
//! 2. [`parser`] builds the document tree and registers every definition in
//!    a [`context::CompilationContext`].
//! 3. [`generate`] walks the tree, expanding templates and customs through
//!    [`specialize`] and folding property expressions with [`evaluate`].
//! 4. [`dispatch`] compiles the placeholder fragments ([`script_ext`] for
//!    the script extension) and merges them into the HTML, CSS and JS
//!    outputs.

pub mod ast;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod evaluate;
pub mod generate;
pub mod html;
pub mod parser;
pub mod scanner;
pub mod script_ext;
pub mod specialize;

pub use dispatch::{CompileOutput, Dispatcher, Options};
pub use error::{CompileError, GenerateError, GenerateErrorKind, GenerateFailure, ParseError, ScanError, ScriptError};
pub use generate::{GenerateResult, Generator, HtmlGenerator};
pub use parser::{ChtlParser, ParsedDocument, Parser};
pub use scanner::{scan, PlaceholderSpan, ScanResult, Sublanguage};

pub fn compile(source: &str) -> Result<CompileOutput, CompileError> {
    compile_with(source, &Options::default())
}

pub fn compile_with(source: &str, options: &Options) -> Result<CompileOutput, CompileError> {
    Dispatcher::new(*options).compile(source)
}
