use chtl_compiler::{compile, CompileError, GenerateErrorKind};
use pretty_assertions::assert_eq;

#[test]
fn test_element_specialization_order() {
    let source = "[Template] @Element Card { div { } span { } span { } }\n\
                  body { @Element Card { delete span[1]; insert after div[0] { p { } } } }";
    let out = compile(source).unwrap();
    assert_eq!(out.html, "<body><div /><p /><span /></body>");
}

#[test]
fn test_index_base_from_configuration() {
    let source = "[Configuration] { INDEX_INITIAL_COUNT = 1; }\n\
                  [Template] @Element Row { li { class: a; } li { class: b; } }\n\
                  ul { @Element Row { delete li[1]; } }";
    let out = compile(source).unwrap();
    assert_eq!(out.html, r#"<ul><li class="b" /></ul>"#);
}

#[test]
fn test_type_constraint_blocks_override() {
    let source = "[Template] @Style Card { Card except type { color; } color: black; padding: 1px; }\n\
                  div { style { @Style Card { color: red; } } }";
    let CompileError::Generate(failure) = compile(source).unwrap_err() else { panic!("expected generation failure") };
    assert_eq!(failure.errors[0].kind, GenerateErrorKind::ConstraintViolation);
}

#[test]
fn test_specializations_of_one_base_are_independent() {
    let source = "[Template] @Element Pair { a { } b { } }\n\
                  section { @Element Pair { delete a; } }\n\
                  aside { @Element Pair { insert at top { i { } } } }\n\
                  nav { @Element Pair; }";
    let out = compile(source).unwrap();
    assert_eq!(
        out.html,
        "<section><b /></section>\n<aside><i /><a /><b /></aside>\n<nav><a /><b /></nav>"
    );
}

#[test]
fn test_same_source_compiles_identically() {
    let source = "[Custom] @Style Box { color: red; margin: 0; }\n\
                  p { style { @Style Box { delete margin; padding: 2px; } } }";
    let first = compile(source).unwrap();
    let second = compile(source).unwrap();
    assert_eq!(first.html, second.html);
    assert_eq!(first.html, r#"<p style="color: red; padding: 2px;" />"#);
}

#[test]
fn test_missing_delete_target() {
    let source = "[Template] @Element Card { div { } }\nbody { @Element Card { delete table; } }";
    let CompileError::Generate(failure) = compile(source).unwrap_err() else { panic!("expected generation failure") };
    assert_eq!(failure.errors[0].kind, GenerateErrorKind::MissingTarget);
    assert_eq!(failure.partial.html, "<body></body>");
}
