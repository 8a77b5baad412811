//! Boundary scanner.
//!
//! Finds the style and script regions of a raw document, classifies the
//! sub-spans inside them into sublanguages and swaps each span for an opaque
//! placeholder id. Spans are held in an arena keyed by id; the rewritten text
//! is produced (and later restored) in a single pass, so no offsets shift
//! while the document is being edited.

use crate::error::ScanError;
use crate::evaluate::is_expression;
use crate::parser::positions::position_at;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, trace, warn};

/// Sublanguage a placeholder span belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Sublanguage {
    TemplateLang,
    ScriptExtension,
    Css,
    Js,
}

impl Sublanguage {
    /// Placeholder id prefix, followed by the span number
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Sublanguage::TemplateLang => "CHTL_CODE_PLACEHOLDER_",
            Sublanguage::ScriptExtension => "CHTL_JS_CODE_PLACEHOLDER_",
            Sublanguage::Css => "CSS_CODE_PLACEHOLDER_",
            Sublanguage::Js => "JS_CODE_PLACEHOLDER_",
        }
    }
}

/// One extracted span. `start..end` are byte offsets into the scanned document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaceholderSpan {
    pub id: String,
    pub original: String,
    pub sublanguage: Sublanguage,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanResult {
    pub rewritten: String,
    /// Document order
    pub spans: Vec<PlaceholderSpan>,
}

impl ScanResult {
    pub fn span(&self, id: &str) -> Option<&PlaceholderSpan> {
        self.spans.iter().find(|s| s.id == id)
    }

    pub fn count(&self, sublanguage: Sublanguage) -> usize {
        self.spans.iter().filter(|s| s.sublanguage == sublanguage).count()
    }

    /// The original document
    pub fn restore(&self) -> String {
        restore(&self.rewritten, &self.spans)
    }

    /// Restore only the spans of one sublanguage, leaving the other placeholders in place
    pub fn restore_only(&self, sublanguage: Sublanguage) -> String {
        substitute(&self.rewritten, &self.spans, |span| {
            (span.sublanguage == sublanguage).then(|| span.original.clone())
        })
    }
}

lazy_static! {
    static ref REGION_OPEN: Regex = Regex::new(r"(?i:<(style|script)\b[^>]*>)|\b(style|script)\s*\{").unwrap();
    static ref STYLE_CLOSE: Regex = Regex::new(r"(?i)</style\s*>").unwrap();
    static ref SCRIPT_CLOSE: Regex = Regex::new(r"(?i)</script\s*>").unwrap();
    /// `[Origin] @Html name {`, `[Origin Style] {`: the body is raw text
    static ref ORIGIN_OPEN: Regex =
        Regex::new(r"\[Origin(?:\s+[A-Za-z]+)?\]\s*(?:@[A-Za-z]+\s*)?(?:[A-Za-z_][\w.-]*\s*)?\{").unwrap();

    // Script regions, in priority order
    static ref BLOCK_CALL: Regex = Regex::new(r"\b(?:Listen|Animate|Delegate|ScriptLoader|Router)\s*\{").unwrap();
    static ref VIR_OBJECT: Regex = Regex::new(r"\bVir\s+[A-Za-z_$][\w$]*\s*=\s*\{").unwrap();
    static ref VIR_PREFIX: Regex = Regex::new(r"\bVir\s+[A-Za-z_$][\w$]*\s*=\s*$").unwrap();
    static ref SCRIPT_TEMPLATE_REF: Regex = Regex::new(
        r"(?:\[(?:Custom|Template)\]\s*)?@(?:Style|Element|Var)\s+[A-Za-z_]\w*(?:\.[A-Za-z_]\w*)*(?:\s*\([^()]*\))?"
    ).unwrap();
    static ref ARROW_CALL: Regex = Regex::new(
        r"(?:\{\{[^{}]+\}\}|[A-Za-z_$][\w$]*)(?:\s*->\s*[A-Za-z_$][\w$]*)+"
    ).unwrap();
    static ref ENHANCED_SELECTOR: Regex = Regex::new(r"\{\{[^{}]+\}\}").unwrap();
    static ref RESPONSIVE_VALUE: Regex = Regex::new(r"\$[A-Za-z_][\w]*\$").unwrap();
    static ref JS_OPEN: Regex = Regex::new(
        r"\b(?:async\s+)?function\b|\bclass\s+[A-Za-z_$]|\b(?:if|for|while|switch)\s*\(|\btry\s*\{|=>\s*\{"
    ).unwrap();

    // Style regions, in priority order
    static ref PROPERTY: Regex = Regex::new(r"(?:^|[;{\s])[A-Za-z-]+\s*:([^;{}]*)").unwrap();
    static ref PREFIXED_REF: Regex = Regex::new(
        r"\[(?:Custom|Template)\]\s*@(?:Style|Var|Element)\s+[A-Za-z_]\w*(?:\.[A-Za-z_]\w*)*(?:\s+from\s+[A-Za-z_][\w.]*)?"
    ).unwrap();
    static ref STYLE_REF: Regex = Regex::new(
        r"@(?:Style|Var|Element)\s+[A-Za-z_]\w*(?:\.[A-Za-z_]\w*)*(?:\s+from\s+[A-Za-z_][\w.]*)?"
    ).unwrap();
    static ref VAR_REF: Regex = Regex::new(
        r"\b(?:[A-Z]\w*|[A-Za-z_]\w*(?:\.[A-Za-z_]\w*)+)\(\s*[A-Za-z_][\w-]*\s*(?:=\s*[^()]*)?\)"
    ).unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegionKind {
    Style,
    /// `script { }` blocks may reference template definitions; `<script>` tags may not
    Script { template_refs: bool },
}

impl RegionKind {
    fn name(&self) -> &'static str {
        match self {
            RegionKind::Style => "style",
            RegionKind::Script { .. } => "script",
        }
    }
}

/// Content range of a style or script region
#[derive(Debug, Clone, Copy)]
struct Region {
    kind: RegionKind,
    start: usize,
    end: usize,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    start: usize,
    end: usize,
    sublanguage: Sublanguage,
}

/// Accepted spans, first claim wins
struct Claims<'a> {
    document: &'a str,
    accepted: Vec<Candidate>,
}

impl<'a> Claims<'a> {
    fn new(document: &'a str) -> Self {
        Self { document, accepted: Vec::new() }
    }

    fn offer(&mut self, start: usize, end: usize, sublanguage: Sublanguage) -> bool {
        let text = &self.document[start..end];
        let start = start + (text.len() - text.trim_start().len());
        let end = end - (text.len() - text.trim_end().len());
        if start >= end {
            return false;
        }
        // An id followed by a digit would read as a different id
        if self.document.as_bytes().get(end).is_some_and(u8::is_ascii_digit) {
            return false;
        }
        if self.accepted.iter().any(|c| start < c.end && c.start < end) {
            return false;
        }
        self.accepted.push(Candidate { start, end, sublanguage });
        true
    }
}

/// Split a document into placeholder spans.
///
/// Fails only when a style or script region never closes.
pub fn scan(document: &str) -> Result<ScanResult, ScanError> {
    let regions = find_regions(document)?;
    let mut claims = Claims::new(document);

    for region in &regions {
        match region.kind {
            RegionKind::Style => claim_style_spans(&mut claims, region),
            RegionKind::Script { template_refs } => claim_script_spans(&mut claims, region, template_refs),
        }
    }

    let mut candidates = claims.accepted;
    candidates.sort_by_key(|c| c.start);

    let mut counter = 0usize;
    let mut spans = Vec::with_capacity(candidates.len());
    let mut rewritten = String::with_capacity(document.len());
    let mut cursor = 0;
    for candidate in candidates {
        let id = loop {
            let id = format!("{}{}", candidate.sublanguage.id_prefix(), counter);
            counter += 1;
            if !document.contains(&id) {
                break id;
            }
            trace!(id = %id, "placeholder id already present in document, skipping");
        };
        rewritten.push_str(&document[cursor..candidate.start]);
        rewritten.push_str(&id);
        cursor = candidate.end;
        spans.push(PlaceholderSpan {
            id,
            original: document[candidate.start..candidate.end].to_string(),
            sublanguage: candidate.sublanguage,
            start: candidate.start,
            end: candidate.end,
        });
    }
    rewritten.push_str(&document[cursor..]);

    debug!(regions = regions.len(), spans = spans.len(), "scanned document");
    Ok(ScanResult { rewritten, spans })
}

/// Replace every placeholder id with its original text
pub fn restore(rewritten: &str, spans: &[PlaceholderSpan]) -> String {
    substitute(rewritten, spans, |span| Some(span.original.clone()))
}

/// Replace every placeholder id with its compiled fragment, or with the
/// original text when no fragment was produced for it.
pub fn merge(text: &str, spans: &[PlaceholderSpan], fragments: &HashMap<String, String>) -> String {
    substitute(text, spans, |span| {
        Some(fragments.get(&span.id).cloned().unwrap_or_else(|| span.original.clone()))
    })
}

/// Single left-to-right pass over `text`. Ids are tried longest first so a
/// short id never matches the head of a longer one. `None` keeps the id.
fn substitute(text: &str, spans: &[PlaceholderSpan], replacement: impl Fn(&PlaceholderSpan) -> Option<String>) -> String {
    if spans.is_empty() {
        return text.to_string();
    }

    let by_id: HashMap<&str, &PlaceholderSpan> = spans.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut ids: Vec<&str> = by_id.keys().copied().collect();
    ids.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    let pattern = ids.iter().map(|id| regex::escape(id)).collect::<Vec<_>>().join("|");

    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(err) => {
            warn!(error = %err, "placeholder pattern rejected, substituting ids one by one");
            let mut out = text.to_string();
            for id in ids {
                if let Some(value) = by_id.get(id).and_then(|span| replacement(span)) {
                    out = out.replace(id, &value);
                }
            }
            return out;
        }
    };

    re.replace_all(text, |caps: &Captures| {
        let id = &caps[0];
        by_id
            .get(id)
            .and_then(|span| replacement(span))
            .unwrap_or_else(|| id.to_string())
    })
    .into_owned()
}

// === Regions ===

fn find_regions(document: &str) -> Result<Vec<Region>, ScanError> {
    let mut regions = Vec::new();
    let mut from = 0;

    while let Some(caps) = REGION_OPEN.captures_at(document, from) {
        let Some(whole) = caps.get(0) else { break };

        // Origin bodies are emitted verbatim, regions inside them included
        if let Some(origin) = ORIGIN_OPEN.find_at(document, from).filter(|m| m.start() < whole.start()) {
            let open = origin.end() - 1;
            match matching_brace(document, open) {
                Some(close) => {
                    trace!(start = origin.start(), end = close, "origin body skipped");
                    from = close;
                    continue;
                }
                None => break,
            }
        }

        if let Some(tag) = caps.get(1) {
            let is_style = tag.as_str().eq_ignore_ascii_case("style");
            let close_re: &Regex = if is_style { &STYLE_CLOSE } else { &SCRIPT_CLOSE };
            let kind = if is_style { RegionKind::Style } else { RegionKind::Script { template_refs: false } };
            let unbalanced = || ScanError::Unbalanced { region: kind.name(), opened: position_at(document, whole.start()) };

            let close = close_re.find_at(document, whole.end()).ok_or_else(unbalanced)?;
            if !braces_balance(&document[whole.end()..close.start()]) {
                return Err(unbalanced());
            }
            regions.push(Region { kind, start: whole.end(), end: close.start() });
            from = close.end();
            continue;
        }

        // Keyword form: `style {` / `script {`
        let Some(keyword) = caps.get(2) else { break };
        let preceded_by_name = document[..whole.start()]
            .chars()
            .next_back()
            .is_some_and(|c| matches!(c, '@' | '-' | '.' | '$'));
        if preceded_by_name {
            from = keyword.end();
            continue;
        }

        let kind = if keyword.as_str() == "style" {
            RegionKind::Style
        } else {
            RegionKind::Script { template_refs: true }
        };
        let open = whole.end() - 1;
        let close = matching_brace(document, open).ok_or(ScanError::Unbalanced {
            region: kind.name(),
            opened: position_at(document, keyword.start()),
        })?;
        regions.push(Region { kind, start: open + 1, end: close - 1 });
        from = close;
    }

    Ok(regions)
}

/// End of the `<style>` or `<script>` element whose opening tag starts at
/// `at`, closing tag included
pub(crate) fn raw_tag_end(document: &str, at: usize) -> Option<usize> {
    let caps = REGION_OPEN.captures_at(document, at)?;
    let whole = caps.get(0).filter(|m| m.start() == at)?;
    let tag = caps.get(1)?;
    let close_re: &Regex = if tag.as_str().eq_ignore_ascii_case("style") { &STYLE_CLOSE } else { &SCRIPT_CLOSE };
    close_re.find_at(document, whole.end()).map(|m| m.end())
}

/// Offset just past the `}` that balances the `{` at `open`
pub(crate) fn matching_brace(text: &str, open: usize) -> Option<usize> {
    matching(text, open, b'{', b'}')
}

fn matching_paren(text: &str, open: usize) -> Option<usize> {
    matching(text, open, b'(', b')')
}

fn matching(text: &str, open: usize, opener: u8, closer: u8) -> Option<usize> {
    let mut depth = 0usize;
    for (i, &byte) in text.as_bytes().iter().enumerate().skip(open) {
        if byte == opener {
            depth += 1;
        } else if byte == closer {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(i + 1);
            }
        }
    }
    None
}

fn braces_balance(text: &str) -> bool {
    let mut depth = 0i64;
    for byte in text.bytes() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Offset of the first non-whitespace byte at or after `from`
fn skip_whitespace(text: &str, from: usize, limit: usize) -> usize {
    let rest = &text[from..limit];
    from + (rest.len() - rest.trim_start().len())
}

// === Style regions ===

fn claim_style_spans(claims: &mut Claims, region: &Region) {
    let document = claims.document;
    let content = &document[region.start..region.end];
    let base = region.start;

    for caps in PROPERTY.captures_iter(content) {
        let Some(value) = caps.get(1) else { continue };
        if content[value.end()..].starts_with('{') || !is_expression(value.as_str()) {
            continue;
        }
        claims.offer(base + value.start(), base + value.end(), Sublanguage::Css);
    }

    for re in [&*PREFIXED_REF, &*STYLE_REF] {
        for m in re.find_iter(content) {
            let end = with_specialization(document, base + m.end(), region.end);
            claims.offer(base + m.start(), end, Sublanguage::Css);
        }
    }

    for m in VAR_REF.find_iter(content) {
        claims.offer(base + m.start(), base + m.end(), Sublanguage::Css);
    }
}

/// Extend a reference over a directly following `{ ... }` specialization block
fn with_specialization(document: &str, end: usize, limit: usize) -> usize {
    let next = skip_whitespace(document, end, limit);
    if document[next..limit].starts_with('{') {
        if let Some(close) = matching_brace(document, next).filter(|&c| c <= limit) {
            return close;
        }
    }
    end
}

// === Script regions ===

fn claim_script_spans(claims: &mut Claims, region: &Region, template_refs: bool) {
    let document = claims.document;
    let content = &document[region.start..region.end];
    let base = region.start;

    for m in BLOCK_CALL.find_iter(content) {
        let open = base + m.end() - 1;
        let Some(close) = matching_brace(document, open).filter(|&c| c <= region.end) else { continue };
        let start = extend_receiver(document, region.start, base + m.start());
        claims.offer(start, close, Sublanguage::ScriptExtension);
    }
    for m in VIR_OBJECT.find_iter(content) {
        let open = base + m.end() - 1;
        if let Some(close) = matching_brace(document, open).filter(|&c| c <= region.end) {
            claims.offer(base + m.start(), close, Sublanguage::ScriptExtension);
        }
    }

    if template_refs {
        for m in SCRIPT_TEMPLATE_REF.find_iter(content) {
            claims.offer(base + m.start(), base + m.end(), Sublanguage::TemplateLang);
        }
    }

    for re in [&*ARROW_CALL, &*ENHANCED_SELECTOR, &*RESPONSIVE_VALUE] {
        for m in re.find_iter(content) {
            claims.offer(base + m.start(), base + m.end(), Sublanguage::ScriptExtension);
        }
    }

    for m in JS_OPEN.find_iter(content) {
        if let Some((start, end)) = js_block(document, base + m.start(), base + m.end(), region.end) {
            claims.offer(start, end, Sublanguage::Js);
        }
    }
}

/// Pull the start of a block call back over `receiver ->` and `Vir name =`
fn extend_receiver(document: &str, lower: usize, at: usize) -> usize {
    let mut start = at;

    let before = document[lower..start].trim_end();
    if let Some(head) = before.strip_suffix("->") {
        let receiver_end = lower + head.trim_end().len();
        let receiver = &document[lower..receiver_end];
        let receiver_start = if receiver.ends_with("}}") {
            receiver.rfind("{{").map(|i| lower + i)
        } else {
            let len = receiver
                .chars()
                .rev()
                .take_while(|c| c.is_alphanumeric() || matches!(c, '_' | '$' | '.'))
                .map(char::len_utf8)
                .sum::<usize>();
            (len > 0).then(|| receiver_end - len)
        };
        if let Some(receiver_start) = receiver_start {
            start = receiver_start;
        }
    }

    if let Some(m) = VIR_PREFIX.find(&document[lower..start]) {
        start = lower + m.start();
    }
    start
}

/// Whole extent of a JS block opening at `start`; the header regex matched `start..header_end`
fn js_block(document: &str, start: usize, header_end: usize, limit: usize) -> Option<(usize, usize)> {
    let header = &document[start..header_end];

    if header.starts_with("=>") {
        let open = header_end - 1;
        return Some((open, matching_brace(document, open).filter(|&c| c <= limit)?));
    }

    if header.starts_with("try") {
        let close = matching_brace(document, header_end - 1).filter(|&c| c <= limit)?;
        return Some((start, chain(document, close, limit)));
    }

    if header.ends_with('(') {
        // if / for / while / switch
        let after_condition = matching_paren(document, header_end - 1).filter(|&c| c <= limit)?;
        let open = skip_whitespace(document, after_condition, limit);
        if !document[open..limit].starts_with('{') {
            return None;
        }
        let close = matching_brace(document, open).filter(|&c| c <= limit)?;
        return Some((start, chain(document, close, limit)));
    }

    // function / class: body is the first `{` outside parentheses, before any `;`
    let mut i = header_end;
    let bytes = document.as_bytes();
    while i < limit {
        match bytes[i] {
            b'(' => i = matching_paren(document, i).filter(|&c| c <= limit)?,
            b'{' => {
                let close = matching_brace(document, i).filter(|&c| c <= limit)?;
                return Some((start, close));
            }
            b';' | b'}' => return None,
            _ => i += 1,
        }
    }
    None
}

/// Extend a closed block over trailing `else`, `else if`, `catch` and `finally` clauses
fn chain(document: &str, mut end: usize, limit: usize) -> usize {
    loop {
        let next = skip_whitespace(document, end, limit);
        let rest = &document[next..limit];

        let clause = ["else", "catch", "finally"]
            .into_iter()
            .find(|kw| rest.starts_with(kw) && !rest[kw.len()..].starts_with(|c: char| c.is_alphanumeric() || c == '_'));
        let Some(clause) = clause else { return end };

        let mut at = skip_whitespace(document, next + clause.len(), limit);
        if clause == "else" && document[at..limit].starts_with("if") {
            at = skip_whitespace(document, at + 2, limit);
        }
        if document[at..limit].starts_with('(') {
            let Some(after) = matching_paren(document, at).filter(|&c| c <= limit) else { return end };
            at = skip_whitespace(document, after, limit);
        }
        if !document[at..limit].starts_with('{') {
            return end;
        }
        match matching_brace(document, at).filter(|&c| c <= limit) {
            Some(close) => end = close,
            None => return end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn originals(result: &ScanResult, sublanguage: Sublanguage) -> Vec<&str> {
        result
            .spans
            .iter()
            .filter(|s| s.sublanguage == sublanguage)
            .map(|s| s.original.as_str())
            .collect()
    }

    #[test]
    fn test_no_regions_is_unchanged() {
        let result = scan("div { text { \"hello\" } }").unwrap();
        assert!(result.spans.is_empty());
        assert_eq!(result.rewritten, "div { text { \"hello\" } }");
    }

    #[test]
    fn test_region_without_matches_is_unchanged() {
        let source = "div { style { color: red; } }";
        let result = scan(source).unwrap();
        assert!(result.spans.is_empty());
        assert_eq!(result.rewritten, source);
    }

    #[test]
    fn test_property_expression_is_css_carrier() {
        let result = scan("div { style { width: 100px + 20px; height: 10px; } }").unwrap();
        assert_eq!(originals(&result, Sublanguage::Css), vec!["100px + 20px"]);
        assert_eq!(result.rewritten, "div { style { width: CSS_CODE_PLACEHOLDER_0; height: 10px; } }");
    }

    #[test]
    fn test_style_references() {
        let source = "style { .a { @Style Base; color: Theme(primary); [Custom] @Style Box { delete color; } } }";
        let result = scan(source).unwrap();
        assert_eq!(
            originals(&result, Sublanguage::Css),
            vec!["@Style Base", "Theme(primary)", "[Custom] @Style Box { delete color; }"]
        );
    }

    #[test]
    fn test_lowercase_css_functions_stay() {
        let result = scan("style { .a { color: rgb(1, 2, 3); width: calc(100% - 2px); } }").unwrap();
        assert_eq!(result.count(Sublanguage::Css), 0);
    }

    #[test]
    fn test_selector_with_arithmetic_is_not_a_property() {
        let result = scan("style { li:nth-child(2n + 1) { color: red; } }").unwrap();
        assert!(result.spans.is_empty());
    }

    #[test]
    fn test_listen_block_folds_handler() {
        let source = "div { script { {{box}} -> Listen { click: () => { console.log(1); } } } }";
        let result = scan(source).unwrap();
        let ext = originals(&result, Sublanguage::ScriptExtension);
        assert_eq!(ext.len(), 1);
        assert!(ext[0].starts_with("{{box}}"));
        assert!(ext[0].ends_with('}'));
        assert_eq!(result.count(Sublanguage::Js), 0);
    }

    #[test]
    fn test_vir_prefix_included() {
        let result = scan("script { Vir handlers = Listen { click: go }; }").unwrap();
        assert_eq!(
            originals(&result, Sublanguage::ScriptExtension),
            vec!["Vir handlers = Listen { click: go }"]
        );
    }

    #[test]
    fn test_script_priority_order() {
        let source = "script { const v = $size$; {{.item[0]}}->textContent = 'x'; function f(a) { if (a) { return 1; } else { return 2; } } }";
        let result = scan(source).unwrap();
        assert_eq!(
            originals(&result, Sublanguage::ScriptExtension),
            vec!["$size$", "{{.item[0]}}->textContent"]
        );
        assert_eq!(
            originals(&result, Sublanguage::Js),
            vec!["function f(a) { if (a) { return 1; } else { return 2; } }"]
        );
    }

    #[test]
    fn test_js_block_containing_extension_stays_inline() {
        let result = scan("script { function f() { {{a}}.focus(); } }").unwrap();
        assert_eq!(result.count(Sublanguage::Js), 0);
        assert_eq!(originals(&result, Sublanguage::ScriptExtension), vec!["{{a}}"]);
    }

    #[test]
    fn test_try_catch_chain() {
        let result = scan("script { try { a(); } catch (e) { b(); } finally { c(); } }").unwrap();
        assert_eq!(
            originals(&result, Sublanguage::Js),
            vec!["try { a(); } catch (e) { b(); } finally { c(); }"]
        );
    }

    #[test]
    fn test_template_refs_only_in_local_script() {
        let local = scan("script { const html = @Element Card; }").unwrap();
        assert_eq!(originals(&local, Sublanguage::TemplateLang), vec!["@Element Card"]);

        let tag = scan("<script>const html = @Element Card;</script>").unwrap();
        assert_eq!(tag.count(Sublanguage::TemplateLang), 0);
    }

    #[test]
    fn test_html_style_tag_region() {
        let result = scan("<style>.a { width: 1px * 2; }</style>").unwrap();
        assert_eq!(originals(&result, Sublanguage::Css), vec!["1px * 2"]);
    }

    #[test]
    fn test_numbering_follows_document_order() {
        let result = scan("script { $a$; $b$; }\nstyle { .x { width: 1px + 1px; } }").unwrap();
        let ids: Vec<&str> = result.spans.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["CHTL_JS_CODE_PLACEHOLDER_0", "CHTL_JS_CODE_PLACEHOLDER_1", "CSS_CODE_PLACEHOLDER_2"]
        );
    }

    #[test]
    fn test_existing_id_is_skipped() {
        let source = "text { \"CHTL_JS_CODE_PLACEHOLDER_0\" }\nscript { $a$; }";
        let result = scan(source).unwrap();
        assert_eq!(result.spans[0].id, "CHTL_JS_CODE_PLACEHOLDER_1");
        assert_eq!(result.restore(), source);
    }

    #[test]
    fn test_span_followed_by_digit_is_not_extracted() {
        let result = scan("script { x = $a$1; }").unwrap();
        assert!(result.spans.is_empty());
    }

    #[test]
    fn test_origin_body_is_not_scanned() {
        let document = "[Origin] @Html { <script>const a = $v$; {{box}}.x = 1;</script> }\nscript { $w$; }";
        let result = scan(document).unwrap();
        assert_eq!(result.spans.len(), 1);
        assert_eq!(result.spans[0].original, "$w$");
        let body_end = document.find('\n').unwrap();
        assert!(result.spans.iter().all(|s| s.start > body_end));
    }

    #[test]
    fn test_empty_selector_is_not_extracted() {
        let result = scan("script { f({{}}); }").unwrap();
        assert_eq!(result.count(Sublanguage::ScriptExtension), 0);
    }

    #[test]
    fn test_raw_tag_end() {
        let document = "<style>.a { }</style>\ndiv { }";
        assert_eq!(raw_tag_end(document, 0), Some(document.find('\n').unwrap()));
        assert_eq!(raw_tag_end(document, 1), None);
        assert_eq!(raw_tag_end("<script>x", 0), None);
    }

    #[test]
    fn test_unterminated_keyword_region() {
        let err = scan("div {\n  style { color: red;\n").unwrap_err();
        let ScanError::Unbalanced { region, opened } = err;
        assert_eq!(region, "style");
        assert_eq!((opened.line, opened.col), (1, 2));
    }

    #[test]
    fn test_unbalanced_tag_region() {
        assert!(scan("<script>if (a) { </script>").is_err());
        assert!(scan("<style>.a { color: red; }").is_err());
    }

    #[test]
    fn test_at_style_is_not_a_region() {
        let result = scan("[Template] @Style Base { color: red; }").unwrap();
        assert!(result.spans.is_empty());
    }

    #[test]
    fn test_merge_prefers_fragments_and_falls_back() {
        let result = scan("script { $a$; $b$; }").unwrap();
        let mut fragments = HashMap::new();
        fragments.insert(result.spans[0].id.clone(), "a".to_string());
        assert_eq!(merge(&result.rewritten, &result.spans, &fragments), "script { a; $b$; }");
    }

    #[test]
    fn test_restore_only_one_sublanguage() {
        let result = scan("div { style { width: 1px + 1px; } script { $a$; } }").unwrap();
        let partial = result.restore_only(Sublanguage::Css);
        assert!(partial.contains("width: 1px + 1px;"));
        assert!(partial.contains("CHTL_JS_CODE_PLACEHOLDER_1"));
    }

    #[test]
    fn test_longest_id_wins() {
        let spans: Vec<PlaceholderSpan> = (0..12)
            .map(|n| PlaceholderSpan {
                id: format!("JS_CODE_PLACEHOLDER_{}", n),
                original: format!("<{}>", n),
                sublanguage: Sublanguage::Js,
                start: 0,
                end: 0,
            })
            .collect();
        assert_eq!(restore("JS_CODE_PLACEHOLDER_11 JS_CODE_PLACEHOLDER_1", &spans), "<11> <1>");
    }
}
