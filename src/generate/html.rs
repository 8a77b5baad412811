//! HTML generator: walks the document tree and fills the three output
//! channels. Template and custom references are resolved lazily against the
//! frozen compilation context; a failing reference only costs the node that
//! made it.

use super::{GenerateResult, Generator, Output};
use crate::ast::{
    Ast, Attribute, Constraint, ConstraintScope, ElementDefinition, ElementNode, ElementUse, Node, OriginKind,
    OriginNode, OriginUse, Property, Reference, ReferenceKind, Span, Specialization, StyleDefinition, StyleItem,
    StyleNode, StyleUse, VarDefinition,
};
use crate::context::CompilationContext;
use crate::error::{GenerateError, GenerateErrorKind, GenerateFailure};
use crate::evaluate::{is_expression, DefaultEvaluator, EvalContext, Evaluator};
use crate::html::{escape_attribute, escape_text, is_boolean_attribute, is_void_element};
use crate::specialize::{apply_element, apply_style, flatten, prune_inheritance, same_definition, PropertyGroup};
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info};

lazy_static! {
    /// `Theme(primary)`, `UI.Theme(primary)`, `Theme(primary = red)`
    static ref VAR_CALL: Regex =
        Regex::new(r"([A-Za-z_][\w-]*(?:\.[A-Za-z_][\w-]*)*)\(\s*([A-Za-z_][\w-]*)\s*(?:=\s*([^()]*?)\s*)?\)").unwrap();
}

/// Resolved declarations in emission order
type Declarations = Vec<(String, String)>;

#[derive(Debug)]
struct CssRule {
    selector: String,
    declarations: Declarations,
}

/// CHTL to HTML/CSS/JS generator
#[derive(Clone)]
pub struct HtmlGenerator {
    evaluator: Arc<dyn Evaluator>,
}

impl HtmlGenerator {
    pub fn new() -> Self {
        Self::with_evaluator(Arc::new(DefaultEvaluator))
    }

    pub fn with_evaluator(evaluator: Arc<dyn Evaluator>) -> Self {
        Self { evaluator }
    }

    /// Expand one reference on its own: the HTML of an element template,
    /// the inline declarations of a style group, or a single variable.
    /// Used for template references embedded in scripts.
    pub fn expand_reference(
        &self,
        reference: &Reference,
        field: Option<&str>,
        context: &CompilationContext,
    ) -> Result<String, GenerateError> {
        let mut walk = Walk::new(context, self.evaluator.as_ref());
        let expanded = match reference.kind {
            ReferenceKind::Element => {
                let use_node = ElementUse { reference: reference.clone(), specialization: None, span: reference.span };
                walk.element_use(&use_node, "")?;
                walk.out.take_html()
            }
            ReferenceKind::Style => {
                let use_node = StyleUse { reference: reference.clone(), specialization: None, span: reference.span };
                let properties = walk.style_use(&use_node, "", &[])?;
                let mut declarations = Declarations::new();
                walk.declare_all(&properties, "", &mut declarations);
                inline_style(&declarations)
            }
            ReferenceKind::Var => walk.var_value(reference, field.unwrap_or_default(), "")?,
        };
        match walk.out.take_first_error() {
            Some(error) => Err(error),
            None => Ok(expanded),
        }
    }
}

impl Default for HtmlGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Generator for HtmlGenerator {
    fn generate(&self, ast: &Ast, context: &CompilationContext) -> Result<GenerateResult, GenerateFailure> {
        let mut walk = Walk::new(context, self.evaluator.as_ref());
        walk.document(&ast.nodes);
        walk.out.finish()
    }
}

/// State of one generation pass
struct Walk<'g> {
    context: &'g CompilationContext,
    evaluator: &'g dyn Evaluator,
    out: Output,
    /// Definitions being expanded, innermost last
    expanding: Vec<(ReferenceKind, String)>,
    /// `DEBUG_MODE` configuration flag
    debug_mode: bool,
}

impl<'g> Walk<'g> {
    fn new(context: &'g CompilationContext, evaluator: &'g dyn Evaluator) -> Self {
        Self { context, evaluator, out: Output::new(), expanding: Vec::new(), debug_mode: context.flag("DEBUG_MODE") }
    }

    fn document(&mut self, nodes: &[Node]) {
        if nodes.iter().any(|n| matches!(n, Node::Use(u) if u.directive == "html5")) {
            self.out.push_html("<!DOCTYPE html>");
        }
        self.top_level(nodes, "");
    }

    /// Top-level nodes each start on their own line
    fn top_level(&mut self, nodes: &[Node], scope: &str) {
        for node in nodes {
            let mark = self.out.html_mark();
            match node {
                Node::Namespace(ns) => self.top_level(&ns.children, &ns.path),
                _ => self.node(node, scope),
            }
            self.out.separate_from(mark);
        }
    }

    fn node(&mut self, node: &Node, scope: &str) {
        let result = match node {
            Node::Element(element) => {
                self.element(element, scope);
                Ok(())
            }
            Node::Text(text) => {
                self.out.push_html(&escape_text(&text.content));
                Ok(())
            }
            Node::Comment(comment) => {
                self.out.push_html(&format!("<!-- {} -->", comment.content));
                Ok(())
            }
            Node::Style(style) => {
                self.global_style(style, scope);
                Ok(())
            }
            Node::Script(script) => {
                self.out.push_script(&script.content);
                Ok(())
            }
            Node::ElementUse(use_node) => self.element_use(use_node, scope),
            Node::Namespace(ns) => {
                for child in &ns.children {
                    self.node(child, &ns.path);
                }
                Ok(())
            }
            Node::Origin(origin) => {
                self.origin(origin);
                Ok(())
            }
            Node::OriginUse(use_node) => self.origin_use(use_node, scope),
            Node::StyleTemplate(_)
            | Node::ElementTemplate(_)
            | Node::VarTemplate(_)
            | Node::CustomStyle(_)
            | Node::CustomElement(_)
            | Node::CustomVar(_)
            | Node::Configuration(_)
            | Node::Import(_)
            | Node::Use(_) => Ok(()),
        };
        if let Err(error) = result {
            debug!(error = %error, "node skipped");
            self.out.error(error);
        }
    }

    // === Elements ===

    fn element(&mut self, element: &ElementNode, scope: &str) {
        let mut shell = ElementNode {
            tag: element.tag.clone(),
            attributes: element.attributes.clone(),
            children: Vec::new(),
            index: element.index,
            span: element.span,
        };

        let mut inline = Declarations::new();
        let mut rules = Vec::new();
        for child in &element.children {
            if let Node::Style(style) = child {
                self.style_items(&style.items, scope, &mut inline, &mut rules, None);
            }
        }

        self.auto_attribute(&mut shell, &rules, '.', "class", "DISABLE_STYLE_AUTO_ADD_CLASS");
        self.auto_attribute(&mut shell, &rules, '#', "id", "DISABLE_STYLE_AUTO_ADD_ID");

        let anchor = anchor_selector(&shell);
        for rule in &rules {
            self.out.push_rule(&rule.selector.replace('&', &anchor), &rule.declarations);
        }

        if !inline.is_empty() {
            let declared = inline_style(&inline);
            let value = match shell.attribute("style").map(|s| s.trim().trim_end_matches(';')) {
                Some(existing) if !existing.is_empty() => format!("{}; {}", existing, declared),
                _ => declared,
            };
            shell.set_attribute(Attribute { name: "style".to_string(), value, span: element.span });
        }

        let content = element.children.iter().filter(|c| is_content(c)).count();
        self.out.push_html(&open_tag(&shell));

        if is_void_element(&element.tag) || content == 0 {
            if content > 0 {
                self.out.warn(format!(
                    "<{}> is a void element; {} child node(s) dropped",
                    element.tag, content
                ));
            }
            self.out.push_html(" />");
            for child in &element.children {
                if let Node::Script(script) = child {
                    self.out.push_script(&script.content);
                }
            }
            return;
        }

        self.out.push_html(">");
        for child in &element.children {
            match child {
                Node::Style(_) => {}
                Node::Script(script) => self.out.push_script(&script.content),
                _ => self.node(child, scope),
            }
        }
        self.out.push_html(&format!("</{}>", element.tag));
    }

    /// Add `class`/`id` from the first local rule that names one
    fn auto_attribute(&self, element: &mut ElementNode, rules: &[CssRule], sigil: char, attribute: &str, disable: &str) {
        if self.context.flag(disable) || element.attribute(attribute).is_some() {
            return;
        }
        if let Some(name) = rules.iter().find_map(|rule| leading_name(&rule.selector, sigil)) {
            element.set_attribute(Attribute { name: attribute.to_string(), value: name, span: element.span });
        }
    }

    fn element_use(&mut self, use_node: &ElementUse, scope: &str) -> Result<(), GenerateError> {
        let context = self.context;
        let reference = &use_node.reference;
        let name = reference.qualified_name();
        let (_, definition) = context
            .lookup_element(reference, scope)
            .ok_or_else(|| GenerateError::unresolved(reference.kind.describe(), &name, reference.span))?;

        self.enter(ReferenceKind::Element, &name, reference.span)?;
        let expanded = self.expand_element(definition, &name, use_node.specialization.as_ref());
        if let Ok(nodes) = &expanded {
            for node in nodes {
                self.node(node, &definition.scope);
            }
        }
        self.leave();
        expanded.map(|_| ())
    }

    /// Children of an element definition after the use-site specialization
    fn expand_element(
        &mut self,
        definition: &ElementDefinition,
        name: &str,
        spec: Option<&Specialization>,
    ) -> Result<Vec<Node>, GenerateError> {
        let Some(spec) = spec else {
            return Ok(definition.children.clone());
        };
        let pruned = prune_inheritance(&definition.children, spec);
        let expanded = self.inline_uses(&pruned, &definition.scope)?;
        let context = self.context;
        let constraints: Vec<&Constraint> = context.constraints_for(name).collect();
        let specialized = apply_element(&expanded, spec, context.index_base(), &constraints)?;
        if self.debug_mode {
            info!(
                element = name,
                before = expanded.len(),
                after = specialized.len(),
                deletes = spec.delete_elements.len(),
                inserts = spec.inserts.len(),
                "element specialized"
            );
        }
        Ok(specialized)
    }

    /// Replace nested `@Element` uses with their children so a
    /// specialization can address them
    fn inline_uses(&mut self, children: &[Node], scope: &str) -> Result<Vec<Node>, GenerateError> {
        let context = self.context;
        let mut out = Vec::with_capacity(children.len());
        for child in children {
            let Node::ElementUse(inner) = child else {
                out.push(child.clone());
                continue;
            };
            let name = inner.reference.qualified_name();
            let (_, definition) = context
                .lookup_element(&inner.reference, scope)
                .ok_or_else(|| GenerateError::unresolved(inner.reference.kind.describe(), &name, inner.reference.span))?;
            self.enter(ReferenceKind::Element, &name, inner.reference.span)?;
            let nodes = self
                .expand_element(definition, &name, inner.specialization.as_ref())
                .and_then(|nodes| self.inline_uses(&nodes, &definition.scope));
            self.leave();
            out.extend(nodes?);
        }
        Ok(out)
    }

    // === Styles ===

    fn global_style(&mut self, style: &StyleNode, scope: &str) {
        let mut root = Declarations::new();
        let mut rules = Vec::new();
        self.style_items(&style.items, scope, &mut root, &mut rules, None);
        self.out.push_rule(":root", &root);
        for rule in &rules {
            self.out.push_rule(&rule.selector, &rule.declarations);
        }
    }

    fn style_items(
        &mut self,
        items: &[StyleItem],
        scope: &str,
        declarations: &mut Declarations,
        rules: &mut Vec<CssRule>,
        parent: Option<&str>,
    ) {
        let exact = exact_constraints(items);
        for item in items {
            match item {
                StyleItem::Declaration(property) => match &property.value {
                    Some(raw) => self.declare(&property.name, raw, property.span, scope, declarations),
                    None => self.out.warn(format!("property '{}' has no value and was dropped", property.name)),
                },
                StyleItem::Use(use_node) => match self.style_use(use_node, scope, &exact) {
                    Ok(properties) => self.declare_all(&properties, scope, declarations),
                    Err(error) => self.out.error(error),
                },
                StyleItem::Rule(rule) => {
                    let selector = match parent {
                        Some(parent) => nest_selector(parent, &rule.selector),
                        None => rule.selector.clone(),
                    };
                    let slot = rules.len();
                    rules.push(CssRule { selector: selector.clone(), declarations: Declarations::new() });
                    let mut nested = Declarations::new();
                    self.style_items(&rule.items, scope, &mut nested, rules, Some(&selector));
                    rules[slot].declarations = nested;
                }
                StyleItem::Delete(deletion) => {
                    debug!(properties = ?deletion.properties, "delete outside a definition ignored");
                }
                StyleItem::Constraint(_) => {}
            }
        }
    }

    fn declare(&mut self, name: &str, raw: &str, span: Span, scope: &str, declarations: &mut Declarations) {
        match self.resolve_value(raw, span, scope, declarations) {
            Ok(value) if value.is_empty() => debug!(property = name, "empty value, property dropped"),
            Ok(value) => set_declaration(declarations, name, value),
            Err(error) => self.out.error(error),
        }
    }

    fn declare_all(&mut self, properties: &[Property], scope: &str, declarations: &mut Declarations) {
        for property in properties {
            if let Some(raw) = &property.value {
                self.declare(&property.name, raw, property.span, scope, declarations);
            }
        }
    }

    /// Substitute variables, then fold arithmetic and conditionals
    fn resolve_value(&mut self, raw: &str, span: Span, scope: &str, siblings: &Declarations) -> Result<String, GenerateError> {
        let substituted = self.substitute_vars(raw, span, scope)?;
        if is_expression(&substituted) {
            let evaluated = self.evaluator.evaluate(&substituted, &EvalContext::new(siblings));
            Ok(evaluated.trim().to_string())
        } else {
            Ok(substituted.trim().to_string())
        }
    }

    /// A style reference resolved to its final properties. Properties a
    /// custom left without a value are dropped with a warning.
    fn style_use(&mut self, use_node: &StyleUse, scope: &str, exact: &[&Constraint]) -> Result<Vec<Property>, GenerateError> {
        let properties = self.resolve_style(use_node, scope, exact)?;
        let name = use_node.reference.qualified_name();
        let (filled, unfilled): (Vec<Property>, Vec<Property>) = properties.into_iter().partition(|p| p.value.is_some());
        for property in &unfilled {
            self.out.warn(format!(
                "property '{}' of '{}' was never given a value and was dropped",
                property.name, name
            ));
        }
        Ok(filled)
    }

    fn resolve_style(&mut self, use_node: &StyleUse, scope: &str, exact: &[&Constraint]) -> Result<Vec<Property>, GenerateError> {
        let context = self.context;
        let reference = &use_node.reference;
        let name = reference.qualified_name();
        let (_, definition) = context
            .lookup_style(reference, scope)
            .ok_or_else(|| GenerateError::unresolved(reference.kind.describe(), &name, reference.span))?;

        self.enter(ReferenceKind::Style, &name, reference.span)?;
        let groups = self.style_groups(definition);
        self.leave();
        let groups = groups?;

        match &use_node.specialization {
            Some(spec) => {
                let mut constraints: Vec<&Constraint> =
                    exact.iter().copied().filter(|c| same_definition(&c.target, &name)).collect();
                constraints.extend(context.constraints_for(&name));
                apply_style(&groups, spec, &constraints)
            }
            None => Ok(flatten(&groups)),
        }
    }

    /// Inherited groups in order, then the definition's own properties.
    /// The definition's own `delete` entries apply to what came before them.
    fn style_groups(&mut self, definition: &StyleDefinition) -> Result<Vec<PropertyGroup>, GenerateError> {
        let exact = exact_constraints(&definition.items);
        let mut groups: Vec<PropertyGroup> = Vec::new();
        let mut own: Vec<Property> = Vec::new();

        for item in &definition.items {
            match item {
                StyleItem::Use(use_node) => {
                    let properties = self.resolve_style(use_node, &definition.scope, &exact)?;
                    groups.push(PropertyGroup::inherited(use_node.reference.qualified_name(), properties));
                }
                StyleItem::Declaration(property) => {
                    let mut property = property.clone();
                    if let Some(raw) = &property.value {
                        property.value = Some(self.substitute_vars(raw, property.span, &definition.scope)?);
                    }
                    own.push(property);
                }
                StyleItem::Delete(deletion) => {
                    groups.retain(|g| match &g.source {
                        Some(source) => !deletion.inheritance.iter().any(|d| same_definition(d, source)),
                        None => true,
                    });
                    for group in &mut groups {
                        group.properties.retain(|p| !deletion.properties.contains(&p.name));
                    }
                    own.retain(|p| !deletion.properties.contains(&p.name));
                }
                StyleItem::Rule(rule) => self.out.warn(format!(
                    "nested rule '{}' inside style group '{}' was ignored",
                    rule.selector, definition.name
                )),
                StyleItem::Constraint(_) => {}
            }
        }

        groups.push(PropertyGroup::own(own));
        Ok(groups)
    }

    // === Variables ===

    fn substitute_vars(&mut self, raw: &str, span: Span, scope: &str) -> Result<String, GenerateError> {
        let mut out = String::with_capacity(raw.len());
        let mut last = 0;
        for caps in VAR_CALL.captures_iter(raw) {
            let (Some(whole), Some(name), Some(field)) = (caps.get(0), caps.get(1), caps.get(2)) else {
                continue;
            };
            if !is_group_name(name.as_str()) {
                continue;
            }
            let value = match caps.get(3) {
                Some(given) => given.as_str().trim().to_string(),
                None => {
                    let reference = Reference {
                        kind: ReferenceKind::Var,
                        prefer: None,
                        name: name.as_str().to_string(),
                        from: None,
                        span,
                    };
                    self.var_value(&reference, field.as_str(), scope)?
                }
            };
            out.push_str(&raw[last..whole.start()]);
            out.push_str(&value);
            last = whole.end();
        }
        out.push_str(&raw[last..]);
        Ok(out)
    }

    fn var_value(&mut self, reference: &Reference, field: &str, scope: &str) -> Result<String, GenerateError> {
        let context = self.context;
        let name = reference.qualified_name();
        let (_, group) = context
            .lookup_var(reference, scope)
            .ok_or_else(|| GenerateError::unresolved(reference.kind.describe(), &name, reference.span))?;

        self.enter(ReferenceKind::Var, &name, reference.span)?;
        let value = self.var_in_group(group, &name, field, reference.span);
        self.leave();
        value
    }

    /// Own entries first (last one wins), then the inherited groups in order
    fn var_in_group(&mut self, group: &VarDefinition, name: &str, field: &str, span: Span) -> Result<String, GenerateError> {
        if let Some(raw) = group.entries.iter().rev().find(|e| e.name == field).and_then(|e| e.value.as_deref()) {
            return self.substitute_vars(raw, span, &group.scope);
        }
        for parent in &group.inherits {
            match self.var_value(parent, field, &group.scope) {
                Err(error) if error.kind == GenerateErrorKind::UnresolvedReference => continue,
                other => return other,
            }
        }
        Err(GenerateError::unresolved("variable", &format!("{}({})", name, field), span))
    }

    // === Origins ===

    fn origin(&mut self, origin: &OriginNode) {
        let content = origin.content.trim();
        match origin.kind {
            OriginKind::Html => self.out.push_html(content),
            OriginKind::Style => self.out.push_html(&format!("<style>{}</style>", content)),
            OriginKind::JavaScript => self.out.push_html(&format!("<script>{}</script>", content)),
        }
    }

    fn origin_use(&mut self, use_node: &OriginUse, scope: &str) -> Result<(), GenerateError> {
        let context = self.context;
        let origin = context
            .lookup_origin(use_node.kind, &use_node.name, scope)
            .ok_or_else(|| GenerateError::unresolved("origin block", &use_node.name, use_node.span))?;
        self.origin(origin);
        Ok(())
    }

    // === Cycle detection ===

    fn enter(&mut self, kind: ReferenceKind, name: &str, span: Span) -> Result<(), GenerateError> {
        if self.expanding.iter().any(|(k, n)| *k == kind && n == name) {
            let chain: Vec<&str> = self.expanding.iter().map(|(_, n)| n.as_str()).collect();
            return Err(GenerateError::new(
                GenerateErrorKind::CircularReference,
                format!("{} '{}' refers to itself: {} -> {}", kind.describe(), name, chain.join(" -> "), name),
                span,
            ));
        }
        self.expanding.push((kind, name.to_string()));
        Ok(())
    }

    fn leave(&mut self) {
        self.expanding.pop();
    }
}

/// Nodes that produce markup inside an element
fn is_content(node: &Node) -> bool {
    matches!(
        node,
        Node::Element(_) | Node::Text(_) | Node::Comment(_) | Node::ElementUse(_) | Node::Origin(_) | Node::OriginUse(_)
    )
}

fn open_tag(element: &ElementNode) -> String {
    let mut tag = format!("<{}", element.tag);
    for attribute in &element.attributes {
        if attribute.value.is_empty() || is_bare_boolean(&attribute.name, &attribute.value) {
            tag.push_str(&format!(" {}", attribute.name));
        } else {
            tag.push_str(&format!(" {}=\"{}\"", attribute.name, escape_attribute(&attribute.value)));
        }
    }
    tag
}

/// `disabled: disabled;` and `checked: true;` render as the bare attribute name
fn is_bare_boolean(name: &str, value: &str) -> bool {
    is_boolean_attribute(name) && (value.eq_ignore_ascii_case(name) || value == "true")
}

/// What `&` stands for in a local rule: first class, else id, else tag
fn anchor_selector(element: &ElementNode) -> String {
    if let Some(class) = element.attribute("class").and_then(|c| c.split_whitespace().next()) {
        return format!(".{}", class);
    }
    if let Some(id) = element.attribute("id").filter(|id| !id.trim().is_empty()) {
        return format!("#{}", id.trim());
    }
    element.tag.clone()
}

fn leading_name(selector: &str, sigil: char) -> Option<String> {
    let rest = selector.trim_start().strip_prefix(sigil)?;
    let name: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    (!name.is_empty()).then_some(name)
}

fn nest_selector(parent: &str, child: &str) -> String {
    if child.contains('&') {
        child.replace('&', parent)
    } else {
        format!("{} {}", parent, child)
    }
}

fn inline_style(declarations: &Declarations) -> String {
    declarations
        .iter()
        .map(|(name, value)| format!("{}: {};", name, value))
        .collect::<Vec<_>>()
        .join(" ")
}

fn set_declaration(declarations: &mut Declarations, name: &str, value: String) {
    match declarations.iter_mut().find(|(n, _)| n == name) {
        Some(existing) => existing.1 = value,
        None => declarations.push((name.to_string(), value)),
    }
}

fn exact_constraints(items: &[StyleItem]) -> Vec<&Constraint> {
    items
        .iter()
        .filter_map(|item| match item {
            StyleItem::Constraint(c) if c.scope == ConstraintScope::Exact => Some(c),
            _ => None,
        })
        .collect()
}

/// `Theme` and `UI.Theme` name variable groups; `rgba` and `calc` do not
fn is_group_name(name: &str) -> bool {
    name.contains('.') || name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{ChtlParser, Parser};
    use pretty_assertions::assert_eq;

    fn generate(source: &str) -> Result<GenerateResult, GenerateFailure> {
        let document = ChtlParser::new().parse(source).unwrap();
        HtmlGenerator::new().generate(&document.ast, &document.context)
    }

    fn render(source: &str) -> GenerateResult {
        generate(source).unwrap()
    }

    #[test]
    fn test_element_attributes_and_text() {
        let result = render(r#"div { id: main; text { "Hello" } }"#);
        assert_eq!(result.html, r#"<div id="main">Hello</div>"#);
    }

    #[test]
    fn test_boolean_attribute_is_bare() {
        let result = render("input { type: checkbox; checked: true; }");
        assert_eq!(result.html, r#"<input type="checkbox" checked />"#);
    }

    #[test]
    fn test_childless_and_void_elements() {
        let result = render("div { } br { }\nspan { text { \"a < b\" } }");
        assert_eq!(result.html, "<div />\n<br />\n<span>a &lt; b</span>");
    }

    #[test]
    fn test_arithmetic_inline_style() {
        let result = render("div { style { width: 100px + 20px; } }");
        assert!(result.html.contains(r#"style="width: 120px;""#), "{}", result.html);
    }

    #[test]
    fn test_conditional_reads_sibling() {
        let result = render("div { style { width: 60px; color: width > 50px ? red : blue; } }");
        assert!(result.html.contains(r#"style="width: 60px; color: red;""#), "{}", result.html);
    }

    #[test]
    fn test_local_rules_add_class() {
        let result = render("div { style { .box { color: red; } &:hover { color: blue; } } }");
        assert_eq!(result.html, r#"<div class="box" />"#);
        assert_eq!(result.css, ".box {\n  color: red;\n}\n.box:hover {\n  color: blue;\n}\n");
    }

    #[test]
    fn test_auto_class_can_be_disabled() {
        let result = render(
            "[Configuration] { DISABLE_STYLE_AUTO_ADD_CLASS = true; }\ndiv { style { .box { color: red; } } }",
        );
        assert_eq!(result.html, "<div />");
        assert!(result.css.starts_with(".box {"));
    }

    #[test]
    fn test_global_style_rules() {
        let result = render("style { color: red; .x { margin: 0; } }");
        assert_eq!(result.css, ":root {\n  color: red;\n}\n.x {\n  margin: 0;\n}\n");
        assert_eq!(result.html, "");
    }

    #[test]
    fn test_custom_style_inherits_and_specializes() {
        let result = render(
            "[Template] @Style Base { color: red; margin: 0; }\n\
             [Custom] @Style Box { @Style Base; padding: 4px; }\n\
             div { style { @Style Box { delete margin; color: blue; } } }",
        );
        assert_eq!(result.html, r#"<div style="color: blue; padding: 4px;" />"#);
    }

    #[test]
    fn test_definition_delete_drops_inherited_group() {
        let result = render(
            "[Template] @Style Base { color: red; }\n\
             [Custom] @Style Plain { @Style Base; delete @Style Base; margin: 0; }\n\
             p { style { @Style Plain; } }",
        );
        assert_eq!(result.html, r#"<p style="margin: 0;" />"#);
    }

    #[test]
    fn test_valueless_custom_property_warns() {
        let result = render("[Custom] @Style Text { color, font-size; }\np { style { @Style Text { color: red; } } }");
        assert_eq!(result.html, r#"<p style="color: red;" />"#);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("font-size"));
    }

    #[test]
    fn test_var_references() {
        let result = render(
            "[Template] @Var Theme { primary: blue; }\n\
             div { style { color: Theme(primary); border-color: Theme(primary = red); background: rgba(0, 0, 0, 1); } }",
        );
        assert!(
            result.html.contains(r#"style="color: blue; border-color: red; background: rgba(0, 0, 0, 1);""#),
            "{}",
            result.html
        );
    }

    #[test]
    fn test_unresolved_style_keeps_rest_of_document() {
        let failure = generate("div { style { @Style DoesNotExist; color: red; } }\np { text { \"ok\" } }").unwrap_err();
        assert_eq!(failure.errors.len(), 1);
        assert_eq!(failure.errors[0].kind, GenerateErrorKind::UnresolvedReference);
        assert_eq!(failure.partial.html, "<div style=\"color: red;\" />\n<p>ok</p>");
    }

    #[test]
    fn test_element_template_with_insert() {
        let result = render(
            "[Template] @Element Card { div { } span { } }\n\
             body { @Element Card { insert after div { p { } } } }",
        );
        assert_eq!(result.html, "<body><div /><p /><span /></body>");
    }

    #[test]
    fn test_circular_element_templates() {
        let failure = generate(
            "[Template] @Element A { @Element B; }\n[Template] @Element B { @Element A; }\nbody { @Element A; }",
        )
        .unwrap_err();
        assert_eq!(failure.errors[0].kind, GenerateErrorKind::CircularReference);
        assert_eq!(failure.partial.html, "<body></body>");
    }

    #[test]
    fn test_namespaced_template() {
        let result = render("[Namespace] UI { [Template] @Style Btn { color: red; } }\na { style { @Style Btn from UI; } }");
        assert_eq!(result.html, r#"<a style="color: red;" />"#);
    }

    #[test]
    fn test_doctype_origin_and_comment() {
        let result = render("use html5;\n# page\n[Origin] @Style { .a { color: red; } }\ndiv { }");
        assert_eq!(
            result.html,
            "<!DOCTYPE html>\n<!-- page -->\n<style>.a { color: red; }</style>\n<div />"
        );
    }

    #[test]
    fn test_script_goes_to_js_channel() {
        let result = render("div { script { go(); } }\np { script { stop(); } text { \"x\" } }");
        assert_eq!(result.html, "<div />\n<p>x</p>");
        assert_eq!(result.js, "go();\nstop();");
    }

    #[test]
    fn test_expand_var_reference() {
        let document = ChtlParser::new().parse("[Template] @Var Theme { primary: blue; }").unwrap();
        let reference = Reference {
            kind: ReferenceKind::Var,
            prefer: None,
            name: "Theme".to_string(),
            from: None,
            span: Span::default(),
        };
        let value = HtmlGenerator::new().expand_reference(&reference, Some("primary"), &document.context);
        assert_eq!(value, Ok("blue".to_string()));
    }
}
