//! Script extension compiler.
//!
//! Turns the enhanced-script spans the scanner extracts into plain
//! JavaScript: `{{selector}}` lookups, `$name$` values, `->` member access,
//! `Vir` declarations and the built-in blocks `Listen`, `Delegate`,
//! `Animate`, `ScriptLoader` and `Router`.

use crate::error::ScriptError;
use crate::scanner::matching_brace;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use tracing::trace;

lazy_static! {
    static ref VIR_DECL: Regex = Regex::new(r"^Vir\s+([A-Za-z_$][\w$]*)\s*=\s*").unwrap();
    static ref BLOCK_HEAD: Regex = Regex::new(r"\b(Listen|Animate|Delegate|ScriptLoader|Router)\s*\{").unwrap();
    static ref SELECTOR: Regex = Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").unwrap();
    static ref RESPONSIVE: Regex = Regex::new(r"\$([A-Za-z_]\w*)\$").unwrap();
    static ref ARROW: Regex = Regex::new(r"\s*->\s*").unwrap();
    static ref INDEXED: Regex = Regex::new(r"^(.+?)\s*\[\s*(\d+)\s*\]$").unwrap();
    static ref BARE_NAME: Regex = Regex::new(r"^[A-Za-z_][\w-]*$").unwrap();
    static ref ENTRY_KEY: Regex = Regex::new(r#"^\s*['"]?([A-Za-z_][\w-]*)['"]?\s*:\s*"#).unwrap();
    static ref KEYFRAME_AT: Regex = Regex::new(r"\bat\s*:").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Listen,
    Animate,
    Delegate,
    ScriptLoader,
    Router,
}

impl Block {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "Listen" => Some(Block::Listen),
            "Animate" => Some(Block::Animate),
            "Delegate" => Some(Block::Delegate),
            "ScriptLoader" => Some(Block::ScriptLoader),
            "Router" => Some(Block::Router),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Block::Listen => "Listen",
            Block::Animate => "Animate",
            Block::Delegate => "Delegate",
            Block::ScriptLoader => "ScriptLoader",
            Block::Router => "Router",
        }
    }
}

/// `key: value` inside a block. Values continued after a top-level comma
/// without a key of their own are collected in `values`.
#[derive(Debug, Clone, PartialEq)]
struct Entry {
    key: String,
    values: Vec<String>,
}

impl Entry {
    fn value(&self) -> String {
        self.values.join(", ")
    }
}

/// Compile one script-extension span to JavaScript
pub fn compile(source: &str) -> Result<String, ScriptError> {
    let text = source.trim();
    let (vir, rest) = match VIR_DECL.captures(text) {
        Some(caps) => {
            let end = caps.get(0).map_or(0, |m| m.end());
            (caps.get(1).map(|m| m.as_str().to_string()), &text[end..])
        }
        None => (None, text),
    };

    if let Some((block, receiver, body)) = block_call(rest)? {
        trace!(block = block.name(), "compiling block call");
        let receiver = receiver.map(rewrite);
        let entries = entries(body);
        let code = match block {
            Block::Listen => listen(receiver.as_deref(), &entries, vir.as_deref())?,
            Block::Delegate => with_vir(delegate(receiver.as_deref(), &entries)?, vir.as_deref(), &entries),
            Block::Animate => animate(receiver.as_deref(), &entries, vir.as_deref())?,
            Block::ScriptLoader => with_vir(script_loader(&entries)?, vir.as_deref(), &entries),
            Block::Router => with_vir(router(&entries)?, vir.as_deref(), &entries),
        };
        return Ok(code);
    }

    match vir {
        Some(name) => Ok(format!("const {} = {};", name, rewrite(rest).trim_end_matches(';'))),
        None => Ok(rewrite(text)),
    }
}

/// `[receiver ->] Block { body }`
fn block_call(text: &str) -> Result<Option<(Block, Option<&str>, &str)>, ScriptError> {
    let Some(caps) = BLOCK_HEAD.captures(text) else {
        return Ok(None);
    };
    let (Some(head), Some(block)) = (caps.get(0), caps.get(1).and_then(|m| Block::from_name(m.as_str()))) else {
        return Ok(None);
    };

    let before = text[..head.start()].trim_end();
    let receiver = if before.is_empty() {
        None
    } else if let Some(receiver) = before.strip_suffix("->") {
        Some(receiver.trim()).filter(|r| !r.is_empty())
    } else {
        return Ok(None);
    };

    let open = head.end() - 1;
    let close = matching_brace(text, open).ok_or(ScriptError::Unbalanced { block: block.name() })?;
    Ok(Some((block, receiver, &text[open + 1..close - 1])))
}

/// Plain rewrites: selectors, responsive values and `->`
pub fn rewrite(text: &str) -> String {
    let text = SELECTOR.replace_all(text, |caps: &Captures| select(&caps[1]));
    let text = RESPONSIVE.replace_all(&text, "$1");
    ARROW.replace_all(&text, ".").into_owned()
}

/// DOM lookup for the inside of `{{ }}`
pub fn select(selector: &str) -> String {
    let selector = selector.trim();
    if let Some(id) = selector.strip_prefix('#').filter(|id| BARE_NAME.is_match(id)) {
        return format!("document.getElementById({})", quote(id));
    }
    if let Some(caps) = INDEXED.captures(selector) {
        return format!("document.querySelectorAll({})[{}]", quote(&caps[1]), &caps[2]);
    }
    if BARE_NAME.is_match(selector) {
        return format!("document.querySelector({})", quote(&format!("#{0}, .{0}, {0}", selector)));
    }
    format!("document.querySelector({})", quote(selector))
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn unquote(text: &str) -> &str {
    let text = text.trim();
    for q in ['"', '\'', '`'] {
        if let Some(inner) = text.strip_prefix(q).and_then(|t| t.strip_suffix(q)) {
            return inner;
        }
    }
    text
}

fn quote_if_bare(text: &str) -> String {
    let text = text.trim();
    if text.starts_with(['"', '\'', '`']) { text.to_string() } else { quote(text) }
}

/// Inner text of a `{{selector}}`, or a quoted selector string
fn selector_text(value: &str) -> String {
    let value = value.trim();
    match value.strip_prefix("{{").and_then(|v| v.strip_suffix("}}")) {
        Some(inner) => inner.trim().to_string(),
        None => unquote(value).to_string(),
    }
}

/// An element expression from a `{{selector}}` or a selector string
fn element_expr(value: &str) -> String {
    let value = value.trim();
    if value.starts_with("{{") || !value.starts_with(['"', '\'', '`']) {
        rewrite(value)
    } else {
        select(unquote(value))
    }
}

/// `[a, b]` to its items; anything else is one item
fn list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .flat_map(|v| {
            let v = v.trim();
            match v.strip_prefix('[').and_then(|inner| inner.strip_suffix(']')) {
                Some(inner) => split_top_level(inner, b",").into_iter().map(str::to_string).collect(),
                None => vec![v.to_string()],
            }
        })
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Split at separators outside brackets and quotes
fn split_top_level<'a>(text: &'a str, separators: &[u8]) -> Vec<&'a str> {
    let bytes = text.as_bytes();
    let mut pieces = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let byte = bytes[i];
        match quote {
            Some(q) => {
                if byte == b'\\' {
                    i += 1;
                } else if byte == q {
                    quote = None;
                }
            }
            None => match byte {
                b'\'' | b'"' | b'`' => quote = Some(byte),
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => depth -= 1,
                _ if depth == 0 && separators.contains(&byte) => {
                    pieces.push(&text[start..i]);
                    start = i + 1;
                }
                _ => {}
            },
        }
        i += 1;
    }
    pieces.push(&text[start..]);
    pieces.into_iter().filter(|p| !p.trim().is_empty()).collect()
}

fn entries(body: &str) -> Vec<Entry> {
    let mut out: Vec<Entry> = Vec::new();
    for piece in split_top_level(body, b",;\n") {
        let keyed = ENTRY_KEY
            .captures(piece)
            .and_then(|caps| Some((caps.get(0)?, caps.get(1)?)))
            .filter(|(whole, _)| !piece[whole.end()..].starts_with("//"));
        match (keyed, out.last_mut()) {
            (Some((whole, key)), _) => out.push(Entry {
                key: key.as_str().to_string(),
                values: vec![piece[whole.end()..].trim().to_string()],
            }),
            (None, Some(last)) => last.values.push(piece.trim().to_string()),
            (None, None) => trace!(piece, "block text without a key ignored"),
        }
    }
    out
}

fn entry<'e>(entries: &'e [Entry], key: &str) -> Option<&'e Entry> {
    entries.iter().rev().find(|e| e.key == key)
}

fn listen(receiver: Option<&str>, entries: &[Entry], vir: Option<&str>) -> Result<String, ScriptError> {
    let mut out = Vec::new();
    match vir {
        Some(name) => {
            let members: Vec<String> = entries.iter().map(|e| format!("{}: {}", e.key, rewrite(&e.value()))).collect();
            out.push(format!("const {} = {{ {} }};", name, members.join(", ")));
            if let Some(receiver) = receiver {
                for e in entries {
                    out.push(format!("{}.addEventListener({}, {}.{});", receiver, quote(&e.key), name, e.key));
                }
            }
        }
        None => {
            let receiver = receiver.ok_or(ScriptError::MissingReceiver { block: "Listen" })?;
            for e in entries {
                out.push(format!("{}.addEventListener({}, {});", receiver, quote(&e.key), rewrite(&e.value())));
            }
        }
    }
    Ok(out.join("\n"))
}

fn delegate(receiver: Option<&str>, entries: &[Entry]) -> Result<String, ScriptError> {
    let receiver = receiver.ok_or(ScriptError::MissingReceiver { block: "Delegate" })?;
    let target = entry(entries, "target").ok_or(ScriptError::MissingField { block: "Delegate", field: "target" })?;
    let condition = list(&target.values)
        .iter()
        .map(|t| format!("target.matches({})", quote(&selector_text(t))))
        .collect::<Vec<_>>()
        .join(" || ");

    let mut out = vec!["{".to_string(), format!("  const delegateRoot = {};", receiver)];
    for e in entries.iter().filter(|e| e.key != "target") {
        out.push(format!("  delegateRoot.addEventListener({}, (event) => {{", quote(&e.key)));
        out.push("    let target = event.target;".to_string());
        out.push("    while (target && target !== delegateRoot) {".to_string());
        out.push(format!("      if ({}) {{", condition));
        out.push(format!("        ({}).call(target, event);", rewrite(&e.value())));
        out.push("        break;".to_string());
        out.push("      }".to_string());
        out.push("      target = target.parentNode;".to_string());
        out.push("    }".to_string());
        out.push("  });".to_string());
    }
    out.push("}".to_string());
    Ok(out.join("\n"))
}

/// Web Animations call on the receiver, or on the `target` entry
fn animate(receiver: Option<&str>, entries: &[Entry], vir: Option<&str>) -> Result<String, ScriptError> {
    let target = match (receiver, entry(entries, "target")) {
        (Some(receiver), _) => receiver.to_string(),
        (None, Some(target)) => element_expr(&target.value()),
        (None, None) => return Err(ScriptError::MissingField { block: "Animate", field: "target" }),
    };

    let mut keyframes = Vec::new();
    if let Some(begin) = entry(entries, "begin") {
        keyframes.push(rewrite(&begin.value()));
    }
    if let Some(when) = entry(entries, "when") {
        for frame in list(&when.values) {
            keyframes.push(KEYFRAME_AT.replace_all(&rewrite(&frame), "offset:").into_owned());
        }
    }
    if let Some(end) = entry(entries, "end") {
        keyframes.push(rewrite(&end.value()));
    }

    let mut options = Vec::new();
    if let Some(duration) = entry(entries, "duration") {
        options.push(format!("duration: {}", duration.value()));
    }
    if let Some(easing) = entry(entries, "easing") {
        options.push(format!("easing: {}", quote_if_bare(&easing.value())));
    }
    if let Some(delay) = entry(entries, "delay") {
        options.push(format!("delay: {}", delay.value()));
    }
    if let Some(looping) = entry(entries, "loop") {
        let value = looping.value();
        let iterations = if value.trim() == "-1" { "Infinity".to_string() } else { value };
        options.push(format!("iterations: {}", iterations));
    }
    if let Some(direction) = entry(entries, "direction") {
        options.push(format!("direction: {}", quote_if_bare(&direction.value())));
    }

    let call = format!("{}.animate([{}], {{ {} }})", target, keyframes.join(", "), options.join(", "));
    let callback = entry(entries, "callback").map(|c| rewrite(&c.value()));
    Ok(match (vir, callback) {
        (Some(name), Some(callback)) => format!("const {0} = {1};\n{0}.finished.then({2});", name, call, callback),
        (Some(name), None) => format!("const {} = {};", name, call),
        (None, Some(callback)) => format!("{}.finished.then({});", call, callback),
        (None, None) => format!("{};", call),
    })
}

/// Scripts injected one after another, each waiting for the previous load
fn script_loader(entries: &[Entry]) -> Result<String, ScriptError> {
    let paths: Vec<String> = entries
        .iter()
        .filter(|e| e.key == "load" || e.key == "src")
        .flat_map(|e| list(&e.values))
        .map(|p| quote(unquote(&p)))
        .collect();
    if paths.is_empty() {
        return Err(ScriptError::MissingField { block: "ScriptLoader", field: "load" });
    }

    Ok([
        format!("[{}].reduce((chain, src) => chain.then(() => new Promise((resolve, reject) => {{", paths.join(", ")),
        "  const script = document.createElement('script');".to_string(),
        "  script.src = src;".to_string(),
        "  script.onload = resolve;".to_string(),
        "  script.onerror = () => reject(new Error('failed to load ' + src));".to_string(),
        "  document.head.appendChild(script);".to_string(),
        "})), Promise.resolve());".to_string(),
    ]
    .join("\n"))
}

/// Hash router: shows the page whose url matches `location.hash`, hides the rest
fn router(entries: &[Entry]) -> Result<String, ScriptError> {
    let urls: Vec<String> = entries.iter().filter(|e| e.key == "url").flat_map(|e| list(&e.values)).collect();
    let pages: Vec<String> = entries.iter().filter(|e| e.key == "page").flat_map(|e| list(&e.values)).collect();
    if urls.is_empty() {
        return Err(ScriptError::MissingField { block: "Router", field: "url" });
    }
    if pages.is_empty() {
        return Err(ScriptError::MissingField { block: "Router", field: "page" });
    }
    if urls.len() != pages.len() {
        trace!(urls = urls.len(), pages = pages.len(), "unpaired routes dropped");
    }

    let routes: Vec<String> = urls
        .iter()
        .zip(&pages)
        .map(|(url, page)| format!("[{}, {}]", quote(unquote(url)), element_expr(page)))
        .collect();

    Ok([
        "(() => {".to_string(),
        format!("  const routes = [{}];", routes.join(", ")),
        "  const show = () => {".to_string(),
        "    const path = window.location.hash.slice(1) || '/';".to_string(),
        "    for (const [url, page] of routes) {".to_string(),
        "      if (page) page.style.display = url === path ? '' : 'none';".to_string(),
        "    }".to_string(),
        "  };".to_string(),
        "  window.addEventListener('hashchange', show);".to_string(),
        "  if (document.readyState === 'loading') document.addEventListener('DOMContentLoaded', show); else show();"
            .to_string(),
        "})();".to_string(),
    ]
    .join("\n"))
}

/// `Vir name = Block { ... }` also binds the block's entries as an object
fn with_vir(code: String, vir: Option<&str>, entries: &[Entry]) -> String {
    match vir {
        Some(name) => {
            let members: Vec<String> = entries.iter().map(|e| format!("{}: {}", e.key, rewrite(&e.value()))).collect();
            format!("{}\nconst {} = {{ {} }};", code, name, members.join(", "))
        }
        None => code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_selector_forms() {
        assert_eq!(select("#app"), "document.getElementById('app')");
        assert_eq!(select(".item[2]"), "document.querySelectorAll('.item')[2]");
        assert_eq!(select("box"), "document.querySelector('#box, .box, box')");
        assert_eq!(select(".list > li"), "document.querySelector('.list > li')");
    }

    #[test]
    fn test_plain_rewrites() {
        assert_eq!(
            compile("{{#title}} -> textContent").unwrap(),
            "document.getElementById('title').textContent"
        );
        assert_eq!(compile("$count$").unwrap(), "count");
        assert_eq!(compile("{{.item[0]}}").unwrap(), "document.querySelectorAll('.item')[0]");
    }

    #[test]
    fn test_listen() {
        let js = compile("{{box}} -> Listen { click: () => { {{box}}->classList.add('on'); }, mouseenter: hover }").unwrap();
        assert_eq!(
            js,
            "document.querySelector('#box, .box, box').addEventListener('click', () => { document.querySelector('#box, .box, box').classList.add('on'); });\n\
             document.querySelector('#box, .box, box').addEventListener('mouseenter', hover);"
        );
    }

    #[test]
    fn test_listen_needs_receiver() {
        assert_eq!(
            compile("Listen { click: go }"),
            Err(ScriptError::MissingReceiver { block: "Listen" })
        );
    }

    #[test]
    fn test_vir_listen_binds_handlers() {
        let js = compile("Vir handlers = {{#btn}} -> Listen { click: () => 1 }").unwrap();
        assert_eq!(
            js,
            "const handlers = { click: () => 1 };\ndocument.getElementById('btn').addEventListener('click', handlers.click);"
        );
    }

    #[test]
    fn test_vir_object() {
        assert_eq!(compile("Vir config = { size: $size$ }").unwrap(), "const config = { size: size };");
    }

    #[test]
    fn test_delegate() {
        let js = compile("{{#list}} -> Delegate { target: [{{.item}}, {{.row}}], click: select }").unwrap();
        assert!(js.starts_with("{\n  const delegateRoot = document.getElementById('list');"), "{}", js);
        assert!(js.contains("if (target.matches('.item') || target.matches('.row')) {"), "{}", js);
        assert!(js.contains("(select).call(target, event);"), "{}", js);
    }

    #[test]
    fn test_animate() {
        let js = compile(
            "{{#box}} -> Animate { duration: 300, easing: ease-in, begin: { opacity: 0 }, \
             when: [{ at: 0.5, opacity: 0.5 }], end: { opacity: 1 }, loop: -1 }",
        )
        .unwrap();
        assert_eq!(
            js,
            "document.getElementById('box').animate([{ opacity: 0 }, { offset: 0.5, opacity: 0.5 }, { opacity: 1 }], \
             { duration: 300, easing: 'ease-in', iterations: Infinity });"
        );
    }

    #[test]
    fn test_animate_target_entry() {
        let js = compile("Animate { target: {{.card}}, duration: 100, callback: done }").unwrap();
        assert_eq!(
            js,
            "document.querySelector('.card').animate([], { duration: 100 }).finished.then(done);"
        );
    }

    #[test]
    fn test_script_loader_keeps_urls() {
        let js = compile("ScriptLoader { load: ./a.js, https://cdn.example.com/b.js }").unwrap();
        assert!(js.starts_with("['./a.js', 'https://cdn.example.com/b.js'].reduce("), "{}", js);
    }

    #[test]
    fn test_router() {
        let js = compile("Router { url: [\"/\", \"/about\"], page: [{{#home}}, {{#about}}] }").unwrap();
        assert!(
            js.contains("const routes = [['/', document.getElementById('home')], ['/about', document.getElementById('about')]];"),
            "{}",
            js
        );
        assert!(js.contains("hashchange"));
    }

    #[test]
    fn test_unbalanced_block() {
        assert_eq!(
            compile("{{box}} -> Listen { click: () => {"),
            Err(ScriptError::Unbalanced { block: "Listen" })
        );
    }
}
