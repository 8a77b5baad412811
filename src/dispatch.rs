//! Dispatcher: scans a document, hands every placeholder to the compiler for
//! its sublanguage, runs the template compiler over the rest and merges the
//! fragments back into the generated outputs.

use crate::ast::{DefinitionKind, Position, Reference, ReferenceKind, Span};
use crate::context::CompilationContext;
use crate::error::{CompileError, GenerateError, GenerateFailure, ParseError};
use crate::generate::{Generator, HtmlGenerator};
use crate::parser::{position_at, ChtlParser, Parser};
use crate::scanner::{self, PlaceholderSpan, Sublanguage};
use crate::script_ext;
use lazy_static::lazy_static;
use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info_span};

lazy_static! {
    /// Template reference inside a script: `@Element Card`, `[Custom] @Style Box`, `@Var Theme(primary)`
    static ref INLINE_TEMPLATE: Regex = Regex::new(
        r"^(?:\[(Custom|Template)\]\s*)?@(Style|Element|Var)\s+([A-Za-z_]\w*(?:\.[A-Za-z_]\w*)*)(?:\s*\(\s*([^()]*?)\s*\))?$"
    ).unwrap();
}

/// Compile options
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    /// Fail on the first recovered syntax error instead of reporting it
    pub strict: bool,
    /// Compile placeholder fragments on the rayon pool
    pub parallel: bool,
}

/// Final outputs of one compilation
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompileOutput {
    pub html: String,
    pub css: String,
    pub js: String,
    pub warnings: Vec<String>,
    /// Syntax errors the parser recovered from
    #[serde(skip)]
    pub diagnostics: Vec<ParseError>,
}

pub struct Dispatcher {
    options: Options,
    parser: ChtlParser,
    generator: HtmlGenerator,
}

impl Dispatcher {
    pub fn new(options: Options) -> Self {
        Self { options, parser: ChtlParser::new(), generator: HtmlGenerator::new() }
    }

    pub fn with_generator(options: Options, generator: HtmlGenerator) -> Self {
        Self { options, parser: ChtlParser::new(), generator }
    }

    pub fn compile(&self, source: &str) -> Result<CompileOutput, CompileError> {
        let _span = info_span!("compile", bytes = source.len()).entered();

        let scanned = scanner::scan(source)?;
        debug!(
            spans = scanned.spans.len(),
            css = scanned.count(Sublanguage::Css),
            script_ext = scanned.count(Sublanguage::ScriptExtension),
            "scanned"
        );

        // Style references and expressions belong to the template compiler
        let restored = scanned.restore_only(Sublanguage::Css);
        let offsets = OffsetMap::new(source, &scanned.spans);

        let document = self.parser.parse_recovering(&restored);
        let diagnostics: Vec<ParseError> = document.errors.into_iter().map(|e| offsets.parse_error(e)).collect();
        if self.options.strict && !diagnostics.is_empty() {
            return Err(CompileError::Syntax(diagnostics));
        }

        let context = document.context.freeze();
        let (fragments, mut fragment_errors) = self.compile_fragments(&scanned.spans, &context, source)?;

        let merge = |text: &str| scanner::merge(text, &scanned.spans, &fragments);

        match self.generator.generate(&document.ast, &context) {
            Ok(generated) if fragment_errors.is_empty() => Ok(CompileOutput {
                html: merge(&generated.html),
                css: merge(&generated.css),
                js: merge(&generated.js),
                warnings: generated.warnings,
                diagnostics,
            }),
            Ok(generated) => {
                let partial = crate::generate::GenerateResult {
                    html: merge(&generated.html),
                    css: merge(&generated.css),
                    js: merge(&generated.js),
                    warnings: generated.warnings,
                };
                Err(GenerateFailure { errors: fragment_errors, partial }.into())
            }
            Err(mut failure) => {
                for error in &mut failure.errors {
                    error.span = offsets.span(error.span);
                }
                failure.errors.append(&mut fragment_errors);
                failure.partial.html = merge(&failure.partial.html);
                failure.partial.css = merge(&failure.partial.css);
                failure.partial.js = merge(&failure.partial.js);
                Err(failure.into())
            }
        }
    }

    /// Compiled text per placeholder id. Template references that fail to
    /// resolve are returned separately so the rest of the document still
    /// generates; a malformed script-extension block fails the compilation.
    fn compile_fragments(
        &self,
        spans: &[PlaceholderSpan],
        context: &CompilationContext,
        source: &str,
    ) -> Result<(HashMap<String, String>, Vec<GenerateError>), CompileError> {
        let pending: Vec<&PlaceholderSpan> = spans.iter().filter(|s| s.sublanguage != Sublanguage::Css).collect();
        let compile = |span: &&PlaceholderSpan| (span.id.clone(), self.fragment(span, context, source));

        let results: Vec<(String, Result<String, FragmentError>)> = if self.options.parallel {
            pending.par_iter().map(compile).collect()
        } else {
            pending.iter().map(compile).collect()
        };

        let mut fragments = HashMap::with_capacity(results.len());
        let mut errors = Vec::new();
        for (id, result) in results {
            match result {
                Ok(code) => {
                    fragments.insert(id, code);
                }
                Err(FragmentError::Template(error)) => errors.push(error),
                Err(FragmentError::Script(error)) => return Err(error),
            }
        }
        Ok((fragments, errors))
    }

    fn fragment(&self, span: &PlaceholderSpan, context: &CompilationContext, source: &str) -> Result<String, FragmentError> {
        let location = Span::new(position_at(source, span.start), position_at(source, span.end));
        match span.sublanguage {
            Sublanguage::Js | Sublanguage::Css => Ok(span.original.clone()),
            Sublanguage::ScriptExtension => script_ext::compile(&span.original)
                .map_err(|error| FragmentError::Script(CompileError::Script { error, span: location })),
            Sublanguage::TemplateLang => self
                .inline_template(&span.original, location, context)
                .map_err(FragmentError::Template),
        }
    }

    /// A template reference inside a script becomes a JS string literal
    fn inline_template(&self, text: &str, location: Span, context: &CompilationContext) -> Result<String, GenerateError> {
        let caps = INLINE_TEMPLATE
            .captures(text.trim())
            .ok_or_else(|| GenerateError::unresolved("template reference", text.trim(), location))?;
        let kind = match caps.get(2).map(|m| m.as_str()) {
            Some("Style") => ReferenceKind::Style,
            Some("Element") => ReferenceKind::Element,
            _ => ReferenceKind::Var,
        };
        let prefer = match caps.get(1).map(|m| m.as_str()) {
            Some("Custom") => Some(DefinitionKind::Custom),
            Some("Template") => Some(DefinitionKind::Template),
            _ => None,
        };
        let reference = Reference {
            kind,
            prefer,
            name: caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_default(),
            from: None,
            span: location,
        };
        let field = caps.get(4).map(|m| m.as_str());
        let expanded = self.generator.expand_reference(&reference, field, context)?;
        Ok(serde_json::Value::String(expanded).to_string())
    }
}

enum FragmentError {
    Template(GenerateError),
    Script(CompileError),
}

/// Maps byte offsets in the partly restored document (script placeholders
/// still in place) back to positions in the source
struct OffsetMap<'s> {
    source: &'s str,
    shifts: Vec<Shift>,
}

struct Shift {
    restored_start: usize,
    restored_end: usize,
    original_start: usize,
    /// Source minus restored length, accumulated up to the end of this id
    delta_after: isize,
}

impl<'s> OffsetMap<'s> {
    fn new(source: &'s str, spans: &[PlaceholderSpan]) -> Self {
        let mut kept: Vec<&PlaceholderSpan> = spans.iter().filter(|s| s.sublanguage != Sublanguage::Css).collect();
        kept.sort_by_key(|s| s.start);

        let mut delta = 0isize;
        let mut shifts = Vec::with_capacity(kept.len());
        for span in kept {
            let restored_start = (span.start as isize - delta).max(0) as usize;
            delta += (span.end - span.start) as isize - span.id.len() as isize;
            shifts.push(Shift {
                restored_start,
                restored_end: restored_start + span.id.len(),
                original_start: span.start,
                delta_after: delta,
            });
        }
        Self { source, shifts }
    }

    fn byte(&self, restored: usize) -> usize {
        let mut delta = 0isize;
        for shift in &self.shifts {
            if restored < shift.restored_start {
                break;
            }
            if restored < shift.restored_end {
                return shift.original_start;
            }
            delta = shift.delta_after;
        }
        (restored as isize + delta).max(0) as usize
    }

    fn position(&self, position: Position) -> Position {
        position_at(self.source, self.byte(position.byte))
    }

    fn span(&self, span: Span) -> Span {
        Span::new(self.position(span.start), self.position(span.end))
    }

    fn parse_error(&self, mut error: ParseError) -> ParseError {
        error.span = self.span(error.span);
        error.related_span = error.related_span.map(|s| self.span(s));
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerateErrorKind;
    use pretty_assertions::assert_eq;

    fn compile(source: &str) -> CompileOutput {
        Dispatcher::new(Options::default()).compile(source).unwrap()
    }

    #[test]
    fn test_expression_becomes_inline_style() {
        let out = compile("div { style { width: 100px + 20px; } }");
        assert!(out.html.contains(r#"style="width: 120px;""#), "{}", out.html);
    }

    #[test]
    fn test_listen_block_reaches_js() {
        let out = compile("div { id: box; script { {{box}} -> Listen { click: () => { console.log('hi'); } } } }");
        assert_eq!(out.html, r#"<div id="box" />"#);
        assert_eq!(
            out.js,
            "document.querySelector('#box, .box, box').addEventListener('click', () => { console.log('hi'); });"
        );
    }

    #[test]
    fn test_template_reference_in_script() {
        let out = compile(
            "[Template] @Element Badge { span { text { \"new\" } } }\n\
             div { script { const badge = @Element Badge; } }",
        );
        assert_eq!(out.js, r#"const badge = "<span>new</span>";"#);
    }

    #[test]
    fn test_plain_js_passes_through() {
        let out = compile("div { script { function go() { return 1; } } }");
        assert_eq!(out.js, "function go() { return 1; }");
    }

    #[test]
    fn test_strict_mode_rejects_recovered_errors() {
        let source = "div { id main; }\nspan { }";
        let lenient = Dispatcher::new(Options::default()).compile(source).unwrap();
        assert_eq!(lenient.diagnostics.len(), 1);
        assert!(lenient.html.contains("<span />"));

        let strict = Dispatcher::new(Options { strict: true, parallel: false }).compile(source);
        assert!(matches!(strict, Err(CompileError::Syntax(errors)) if errors.len() == 1));
    }

    #[test]
    fn test_diagnostics_point_into_source() {
        let source = "div { script { {{a}} -> Listen {\n click: go\n } } }\nspan { id x; }";
        let out = compile(source);
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].line(), 4);
    }

    #[test]
    fn test_unresolved_reference_keeps_partial_output() {
        let result = Dispatcher::new(Options::default())
            .compile("div { style { @Style DoesNotExist; } }\np { text { \"ok\" } }");
        let Err(CompileError::Generate(failure)) = result else { panic!("expected generation failure") };
        assert_eq!(failure.errors[0].kind, GenerateErrorKind::UnresolvedReference);
        assert!(failure.partial.html.contains("<p>ok</p>"));
    }

    #[test]
    fn test_malformed_listen_fails() {
        let result = Dispatcher::new(Options::default()).compile("div { script { Listen { click: go } } }");
        assert!(matches!(result, Err(CompileError::Script { .. })));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let source = "div { id: a; script { {{a}} -> Listen { click: one } $n$; {{#b}}->focus(); } }\n\
                      p { script { if (x) { y(); } } }";
        let sequential = Dispatcher::new(Options::default()).compile(source).unwrap();
        let parallel = Dispatcher::new(Options { strict: false, parallel: true }).compile(source).unwrap();
        assert_eq!(sequential.html, parallel.html);
        assert_eq!(sequential.js, parallel.js);
    }
}
