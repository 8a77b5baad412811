//! Use-site specialization of template and custom definitions.
//!
//! Every function here is pure: it reads a resolved copy of a definition and
//! returns a new one. The definitions stored in the compilation context are
//! never touched, so two uses of the same template specialize independently.

use crate::ast::{Attribute, Constraint, ElementNode, ElementSelector, InsertPosition, Node, Property, Specialization};
use crate::error::{GenerateError, GenerateErrorKind};

/// Properties contributed by one level of a style definition.
/// `source` names the inherited group; `None` is the definition's own body.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyGroup {
    pub source: Option<String>,
    pub properties: Vec<Property>,
}

impl PropertyGroup {
    pub fn own(properties: Vec<Property>) -> Self {
        Self { source: None, properties }
    }

    pub fn inherited(source: impl Into<String>, properties: Vec<Property>) -> Self {
        Self { source: Some(source.into()), properties }
    }
}

/// `Theme` matches `UI.Theme` and the other way round
pub fn same_definition(a: &str, b: &str) -> bool {
    a == b || leaf(a) == leaf(b)
}

fn leaf(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Groups in order, a later property overwriting an earlier one in place
pub fn flatten(groups: &[PropertyGroup]) -> Vec<Property> {
    let mut out: Vec<Property> = Vec::new();
    for property in groups.iter().flat_map(|g| &g.properties) {
        overwrite(&mut out, property.clone());
    }
    out
}

fn overwrite(properties: &mut Vec<Property>, property: Property) {
    match properties.iter_mut().find(|p| p.name == property.name) {
        Some(existing) => {
            existing.value = property.value;
            existing.span = property.span;
        }
        None => properties.push(property),
    }
}

/// Reject a specialization that touches a name a constraint forbids
pub fn check_constraints(spec: &Specialization, constraints: &[&Constraint]) -> Result<(), GenerateError> {
    let touched = spec
        .overrides
        .iter()
        .map(|p| (p.name.as_str(), p.span))
        .chain(spec.delete_properties.iter().map(|n| (n.as_str(), spec.span)))
        .chain(spec.delete_elements.iter().map(|s| (s.name.as_str(), s.span)))
        .chain(spec.patches.iter().map(|p| (p.selector.name.as_str(), p.span)))
        .chain(spec.inserts.iter().filter_map(|op| op.target.as_ref()).map(|s| (s.name.as_str(), s.span)));

    for (name, span) in touched {
        if let Some(constraint) = constraints.iter().find(|c| c.forbids(name)) {
            return Err(GenerateError::new(
                GenerateErrorKind::ConstraintViolation,
                format!("'{}' may not be changed on '{}' (forbidden by constraint on '{}')", name, spec.target, constraint.target),
                span,
            ));
        }
    }
    Ok(())
}

/// Apply a style specialization to the resolved groups of a definition.
///
/// Inherited groups named in `delete_inheritance` are dropped, deleted
/// properties are removed, the rest is flattened and the overrides are laid
/// on top (overwriting in place, or appended when new).
pub fn apply_style(
    groups: &[PropertyGroup],
    spec: &Specialization,
    constraints: &[&Constraint],
) -> Result<Vec<Property>, GenerateError> {
    check_constraints(spec, constraints)?;

    let kept: Vec<PropertyGroup> = groups
        .iter()
        .filter(|g| match &g.source {
            Some(source) => !spec.delete_inheritance.iter().any(|d| same_definition(d, source)),
            None => true,
        })
        .map(|g| PropertyGroup {
            source: g.source.clone(),
            properties: g
                .properties
                .iter()
                .filter(|p| !spec.delete_properties.contains(&p.name))
                .cloned()
                .collect(),
        })
        .collect();

    let mut properties = flatten(&kept);
    for property in &spec.overrides {
        overwrite(&mut properties, property.clone());
    }
    Ok(properties)
}

/// Drop `@Element` uses named in `delete @Element X;` before they are expanded
pub fn prune_inheritance(children: &[Node], spec: &Specialization) -> Vec<Node> {
    children
        .iter()
        .filter(|child| match child {
            Node::ElementUse(use_node) => {
                let name = use_node.reference.qualified_name();
                !spec.delete_inheritance.iter().any(|d| same_definition(d, &name))
            }
            _ => true,
        })
        .cloned()
        .collect()
}

/// Position of the child a selector names: the first child with that name,
/// or the `index`-th one (counted from `index_base`).
fn locate(children: &[Node], selector: &ElementSelector, index_base: usize, target: &str) -> Result<usize, GenerateError> {
    let wanted = match selector.index {
        Some(index) => index.checked_sub(index_base),
        None => Some(0),
    };
    wanted
        .and_then(|n| {
            children
                .iter()
                .enumerate()
                .filter(|(_, child)| child.selector_name() == Some(selector.name.as_str()))
                .nth(n)
                .map(|(i, _)| i)
        })
        .ok_or_else(|| {
            let shown = match selector.index {
                Some(index) => format!("{}[{}]", selector.name, index),
                None => selector.name.clone(),
            };
            GenerateError::new(
                GenerateErrorKind::MissingTarget,
                format!("'{}' has no child '{}'", target, shown),
                selector.span,
            )
        })
}

/// Apply an element specialization to the expanded children of a definition.
///
/// Patches and deletions resolve against the children as given. Inserts then
/// run in source order, each target re-located in the list as it stands
/// after the previous edits. An index keeps only that child of the result.
pub fn apply_element(
    children: &[Node],
    spec: &Specialization,
    index_base: usize,
    constraints: &[&Constraint],
) -> Result<Vec<Node>, GenerateError> {
    check_constraints(spec, constraints)?;
    let mut nodes = children.to_vec();

    for patch in &spec.patches {
        let at = locate(children, &patch.selector, index_base, &spec.target)?;
        if let Node::Element(element) = &mut nodes[at] {
            patch_element(element, &patch.attributes, &patch.children);
        }
    }

    let mut doomed = Vec::with_capacity(spec.delete_elements.len());
    for selector in &spec.delete_elements {
        doomed.push(locate(children, selector, index_base, &spec.target)?);
    }
    nodes = nodes
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !doomed.contains(i))
        .map(|(_, node)| node)
        .collect();

    for op in &spec.inserts {
        let content = op.content.iter().cloned();
        match (op.position, &op.target) {
            (InsertPosition::AtTop, _) => {
                nodes.splice(0..0, content);
            }
            (InsertPosition::AtBottom, _) => nodes.extend(content),
            (position, Some(target)) => {
                let at = locate(&nodes, target, index_base, &spec.target)?;
                match position {
                    InsertPosition::Before => {
                        nodes.splice(at..at, content);
                    }
                    InsertPosition::After => {
                        nodes.splice(at + 1..at + 1, content);
                    }
                    _ => {
                        nodes.splice(at..at + 1, content);
                    }
                }
            }
            (_, None) => {
                return Err(GenerateError::new(
                    GenerateErrorKind::MissingTarget,
                    format!("insert into '{}' names no target", spec.target),
                    op.span,
                ));
            }
        }
    }

    if let Some(index) = spec.index {
        let pick = index.checked_sub(index_base).filter(|&i| i < nodes.len());
        let Some(pick) = pick else {
            return Err(GenerateError::new(
                GenerateErrorKind::MissingTarget,
                format!("'{}' has no child at index {}", spec.target, index),
                spec.span,
            ));
        };
        nodes = vec![nodes.swap_remove(pick)];
    }

    Ok(nodes)
}

fn patch_element(element: &mut ElementNode, attributes: &[Attribute], children: &[Node]) {
    for attribute in attributes {
        element.set_attribute(attribute.clone());
    }
    element.children.extend(children.iter().cloned());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ElementPatch, InsertOp, Span};
    use pretty_assertions::assert_eq;

    fn nowhere() -> Span {
        Span::default()
    }

    fn prop(name: &str, value: &str) -> Property {
        Property { name: name.to_string(), value: Some(value.to_string()), span: nowhere() }
    }

    fn el(tag: &str) -> Node {
        Node::Element(ElementNode {
            tag: tag.to_string(),
            attributes: Vec::new(),
            children: Vec::new(),
            index: None,
            span: nowhere(),
        })
    }

    fn sel(name: &str, index: Option<usize>) -> ElementSelector {
        ElementSelector { name: name.to_string(), index, span: nowhere() }
    }

    fn tags(nodes: &[Node]) -> Vec<&str> {
        nodes.iter().filter_map(Node::selector_name).collect()
    }

    fn spec(target: &str) -> Specialization {
        Specialization { target: target.to_string(), ..Default::default() }
    }

    #[test]
    fn test_style_order_inherited_own_overrides() {
        let groups = vec![
            PropertyGroup::inherited("Base", vec![prop("color", "red"), prop("margin", "0")]),
            PropertyGroup::own(vec![prop("padding", "4px"), prop("color", "blue")]),
        ];
        let mut s = spec("Button");
        s.overrides = vec![prop("margin", "2px"), prop("border", "none")];

        let out = apply_style(&groups, &s, &[]).unwrap();
        let pairs: Vec<(&str, &str)> = out
            .iter()
            .map(|p| (p.name.as_str(), p.value.as_deref().unwrap_or("")))
            .collect();
        assert_eq!(
            pairs,
            vec![("color", "blue"), ("margin", "2px"), ("padding", "4px"), ("border", "none")]
        );
    }

    #[test]
    fn test_style_deletions() {
        let groups = vec![
            PropertyGroup::inherited("UI.Base", vec![prop("color", "red")]),
            PropertyGroup::own(vec![prop("padding", "4px"), prop("margin", "0")]),
        ];
        let mut s = spec("Button");
        s.delete_inheritance = vec!["Base".to_string()];
        s.delete_properties = vec!["margin".to_string()];

        let out = apply_style(&groups, &s, &[]).unwrap();
        assert_eq!(out, vec![prop("padding", "4px")]);
    }

    #[test]
    fn test_override_fills_valueless_property() {
        let groups = vec![PropertyGroup::own(vec![
            Property { name: "color".to_string(), value: None, span: nowhere() },
            prop("margin", "0"),
        ])];
        let mut s = spec("Text");
        s.overrides = vec![prop("color", "green")];
        let out = apply_style(&groups, &s, &[]).unwrap();
        assert_eq!(out[0], prop("color", "green"));
    }

    #[test]
    fn test_constraint_rejects_override() {
        let constraint = Constraint {
            target: "Button".to_string(),
            scope: crate::ast::ConstraintScope::Exact,
            names: vec!["color".to_string()],
            span: nowhere(),
        };
        let mut s = spec("Button");
        s.overrides = vec![prop("color", "green")];
        let err = apply_style(&[], &s, &[&constraint]).unwrap_err();
        assert_eq!(err.kind, GenerateErrorKind::ConstraintViolation);
    }

    #[test]
    fn test_delete_before_insert() {
        let base = vec![el("A"), el("B"), el("C")];
        let mut s = spec("Box");
        s.delete_elements = vec![sel("B", None)];
        s.inserts = vec![InsertOp {
            position: InsertPosition::After,
            target: Some(sel("A", None)),
            content: vec![el("D")],
            span: nowhere(),
        }];
        let out = apply_element(&base, &s, 0, &[]).unwrap();
        assert_eq!(tags(&out), vec!["A", "D", "C"]);
    }

    #[test]
    fn test_specialization_is_deterministic() {
        let base = vec![el("A"), el("B"), el("C")];
        let mut s = spec("Box");
        s.delete_elements = vec![sel("C", None)];
        s.inserts = vec![InsertOp {
            position: InsertPosition::AtTop,
            target: None,
            content: vec![el("Z")],
            span: nowhere(),
        }];
        let first = apply_element(&base, &s, 0, &[]).unwrap();
        let second = apply_element(&base, &s, 0, &[]).unwrap();
        assert_eq!(first, second);
        assert_eq!(tags(&base), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_indexed_targets() {
        let base = vec![el("div"), el("span"), el("div")];
        let mut s = spec("Box");
        s.delete_elements = vec![sel("div", Some(1))];
        s.inserts = vec![
            InsertOp {
                position: InsertPosition::Replace,
                target: Some(sel("span", None)),
                content: vec![el("p")],
                span: nowhere(),
            },
            InsertOp {
                position: InsertPosition::Before,
                target: Some(sel("p", None)),
                content: vec![el("hr")],
                span: nowhere(),
            },
            InsertOp {
                position: InsertPosition::AtBottom,
                target: None,
                content: vec![el("footer")],
                span: nowhere(),
            },
        ];
        let out = apply_element(&base, &s, 0, &[]).unwrap();
        assert_eq!(tags(&out), vec!["div", "hr", "p", "footer"]);
    }

    #[test]
    fn test_index_base_from_configuration() {
        let base = vec![el("li"), el("li")];
        let mut s = spec("List");
        s.delete_elements = vec![sel("li", Some(1))];
        let out = apply_element(&base, &s, 1, &[]).unwrap();
        assert_eq!(out.len(), 1);
        assert!(apply_element(&base, &s, 2, &[]).is_err());
    }

    #[test]
    fn test_missing_target_is_an_error() {
        let mut s = spec("Box");
        s.delete_elements = vec![sel("table", None)];
        let err = apply_element(&[el("div")], &s, 0, &[]).unwrap_err();
        assert_eq!(err.kind, GenerateErrorKind::MissingTarget);
        assert!(err.message.contains("table"));
    }

    #[test]
    fn test_patch_adds_attributes_and_children() {
        let base = vec![el("div"), el("div")];
        let mut s = spec("Box");
        s.patches = vec![ElementPatch {
            selector: sel("div", Some(1)),
            attributes: vec![Attribute { name: "id".to_string(), value: "second".to_string(), span: nowhere() }],
            children: vec![el("span")],
            span: nowhere(),
        }];
        let out = apply_element(&base, &s, 0, &[]).unwrap();
        let Node::Element(second) = &out[1] else { panic!("expected element") };
        assert_eq!(second.attribute("id"), Some("second"));
        assert_eq!(tags(&second.children), vec!["span"]);
    }

    #[test]
    fn test_use_index_keeps_one_child() {
        let mut s = spec("Box");
        s.index = Some(1);
        let out = apply_element(&[el("a"), el("b")], &s, 0, &[]).unwrap();
        assert_eq!(tags(&out), vec!["b"]);
    }
}
