use chtl_compiler::{compile, compile_with, CompileError, GenerateErrorKind, Options};
use pretty_assertions::assert_eq;

#[test]
fn test_expression_is_evaluated() {
    let out = compile("div { style { width: 100px + 20px; } }").unwrap();
    assert_eq!(out.html, r#"<div style="width: 120px;" />"#);
}

#[test]
fn test_listen_block_compiles_to_listener() {
    let out = compile("div { id: box; script { {{box}} -> Listen { click: () => { go(); } } } }").unwrap();
    assert_eq!(out.html, r#"<div id="box" />"#);
    assert!(out.js.contains(".addEventListener('click', () => { go(); })"), "{}", out.js);
}

#[test]
fn test_unresolved_style_reference() {
    let err = compile("div { style { @Style DoesNotExist; } }\np { text { \"ok\" } }").unwrap_err();
    let CompileError::Generate(failure) = err else { panic!("expected generation failure") };
    assert_eq!(failure.errors.len(), 1);
    assert_eq!(failure.errors[0].kind, GenerateErrorKind::UnresolvedReference);
    assert!(failure.errors[0].message.contains("DoesNotExist"));
    assert_eq!(failure.partial.html, "<div />\n<p>ok</p>");
    assert!(failure.partial.css.is_empty());
}

#[test]
fn test_named_origin_reused() {
    let source = "[Origin] @Html banner { <b>hi</b> }\nbody { [Origin] @Html banner; }";
    let out = compile(source).unwrap();
    assert!(out.html.contains("<body><b>hi</b></body>"), "{}", out.html);
}

#[test]
fn test_recovered_syntax_error_is_a_diagnostic() {
    let out = compile("div { id main; }\nspan { }").unwrap();
    assert_eq!(out.diagnostics.len(), 1);
    assert!(out.html.contains("<span />"));

    let strict = compile_with("div { id main; }\nspan { }", &Options { strict: true, parallel: false });
    assert!(matches!(strict, Err(CompileError::Syntax(_))));
}

#[test]
fn test_output_serializes_without_diagnostics() {
    let out = compile("p { text { \"hi\" } }").unwrap();
    let json = serde_json::to_value(&out).unwrap();
    assert_eq!(json["html"], "<p>hi</p>");
    assert!(json.get("diagnostics").is_none());
}

#[test]
fn test_style_tag_keeps_following_element() {
    let out = compile("<style>.a { color: red; }</style>\ndiv { }").unwrap();
    assert_eq!(out.html, "<style>.a { color: red; }</style>\n<div />");
    assert!(out.css.is_empty());
}

#[test]
fn test_script_tag_code_is_merged_back() {
    let out = compile("<script>if (ok) { go(); }</script>\ndiv { }").unwrap();
    assert_eq!(out.html, "<script>if (ok) { go(); }</script>\n<div />");
}

#[test]
fn test_script_tag_extension_syntax_is_compiled() {
    let out = compile("body { <script>{{#box}}.focus();</script> div { id: box; } }").unwrap();
    assert!(out.html.contains("<script>document.getElementById('box').focus();</script>"), "{}", out.html);
    assert!(out.html.contains(r#"<div id="box" />"#), "{}", out.html);
}

#[test]
fn test_origin_body_is_verbatim() {
    let out = compile("[Origin] @Html { <script>const a = $v$; {{box}}.x = 1;</script> }").unwrap();
    assert_eq!(out.html, "<script>const a = $v$; {{box}}.x = 1;</script>");
    assert!(out.js.is_empty());
}
