use std::sync::Arc;

// Re-export Position and Span from tokenizer to avoid duplication
pub use crate::parser::tokenizer::{Position, Span};

/// Abstract Syntax Tree
#[derive(Debug, Clone)]
pub struct Ast {
    pub nodes: Vec<Node>,
    pub source: Arc<str>,
}

impl Ast {
    pub fn new(nodes: Vec<Node>, source: Arc<str>) -> Self {
        Self { nodes, source }
    }
}

/// AST Node
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    // Content
    Element(ElementNode),
    Text(TextNode),
    Comment(CommentNode),
    Style(StyleNode),
    Script(ScriptNode),
    ElementUse(ElementUse),

    // Definitions
    StyleTemplate(StyleDefinition),
    ElementTemplate(ElementDefinition),
    VarTemplate(VarDefinition),
    CustomStyle(StyleDefinition),
    CustomElement(ElementDefinition),
    CustomVar(VarDefinition),

    // Directives
    Namespace(NamespaceNode),
    Configuration(ConfigurationNode),
    Import(ImportNode),
    Use(UseNode),
    Origin(OriginNode),
    OriginUse(OriginUse),
}

impl Node {
    /// Tag name used when a specialization targets children by name
    pub fn selector_name(&self) -> Option<&str> {
        match self {
            Node::Element(el) => Some(&el.tag),
            Node::Text(_) => Some("text"),
            _ => None,
        }
    }
}

/// HTML element: `tag { attributes; children }`
#[derive(Debug, Clone, PartialEq)]
pub struct ElementNode {
    pub tag: String,
    /// Attributes in insertion order
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
    /// `tag[index]`, as written
    pub index: Option<usize>,
    pub span: Span,
}

impl ElementNode {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Overwrite in place, or append when absent
    pub fn set_attribute(&mut self, attribute: Attribute) {
        match self.attributes.iter_mut().find(|a| a.name == attribute.name) {
            Some(existing) => existing.value = attribute.value,
            None => self.attributes.push(attribute),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextNode {
    pub content: String,
    pub span: Span,
}

/// `# comment` carried into the HTML output
#[derive(Debug, Clone, PartialEq)]
pub struct CommentNode {
    pub content: String,
    pub span: Span,
}

/// `style { ... }` block, local to an element or at document level
#[derive(Debug, Clone, PartialEq)]
pub struct StyleNode {
    pub items: Vec<StyleItem>,
    pub span: Span,
}

/// One entry of a style body
#[derive(Debug, Clone, PartialEq)]
pub enum StyleItem {
    /// `prop: value;` or a valueless `prop;`
    Declaration(Property),
    /// `@Style Name;` with optional specialization block
    Use(StyleUse),
    /// Nested selector block: `.box { ... }`, `&:hover { ... }`
    Rule(StyleRule),
    /// `delete a, b;` / `delete @Style Base;` in a custom body
    Delete(Deletion),
    /// `Name except [type|global] { ... }`
    Constraint(Constraint),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    /// Raw value text; `None` for a custom's valueless placeholder property
    pub value: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StyleRule {
    pub selector: String,
    pub items: Vec<StyleItem>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StyleUse {
    pub reference: Reference,
    pub specialization: Option<Specialization>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Deletion {
    pub properties: Vec<String>,
    pub inheritance: Vec<String>,
    pub span: Span,
}

/// `script { ... }` with its content kept verbatim
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptNode {
    pub content: String,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefinitionKind {
    Template,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Style,
    Element,
    Var,
}

impl ReferenceKind {
    pub fn describe(&self) -> &'static str {
        match self {
            ReferenceKind::Style => "style group",
            ReferenceKind::Element => "element template",
            ReferenceKind::Var => "variable group",
        }
    }
}

/// Named reference to a template or custom definition
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub kind: ReferenceKind,
    /// Explicit `[Template]` / `[Custom]` prefix
    pub prefer: Option<DefinitionKind>,
    /// Possibly dotted: `UI.ButtonStyle`
    pub name: String,
    /// `from Namespace`
    pub from: Option<String>,
    pub span: Span,
}

impl Reference {
    /// Name with any `from` clause folded in as a qualifier
    pub fn qualified_name(&self) -> String {
        match &self.from {
            Some(ns) => format!("{}.{}", ns, self.name),
            None => self.name.clone(),
        }
    }
}

/// `@Element Name;` used as a node
#[derive(Debug, Clone, PartialEq)]
pub struct ElementUse {
    pub reference: Reference,
    pub specialization: Option<Specialization>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StyleDefinition {
    pub name: String,
    /// Dotted namespace path the definition lives in ("" at top level)
    pub scope: String,
    pub items: Vec<StyleItem>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementDefinition {
    pub name: String,
    pub scope: String,
    pub children: Vec<Node>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDefinition {
    pub name: String,
    pub scope: String,
    pub entries: Vec<Property>,
    pub inherits: Vec<Reference>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceNode {
    pub name: String,
    /// Full dotted path, `Outer.Inner`
    pub path: String,
    pub parent: Option<String>,
    pub children: Vec<Node>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationNode {
    pub name: Option<String>,
    pub settings: Vec<(String, String)>,
    /// `[Name]` block: setting key to accepted spellings
    pub name_map: Vec<(String, Vec<String>)>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportNode {
    /// `@Chtl`, `@Style`, ...
    pub kind: Option<String>,
    pub target: String,
    pub from: Option<String>,
    pub alias: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UseNode {
    pub directive: String,
    pub arguments: Vec<String>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OriginKind {
    Html,
    Style,
    JavaScript,
}

impl OriginKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "html" => Some(OriginKind::Html),
            "style" | "css" => Some(OriginKind::Style),
            "javascript" | "js" => Some(OriginKind::JavaScript),
            _ => None,
        }
    }
}

/// `[Origin] @Html name? { raw }`
#[derive(Debug, Clone, PartialEq)]
pub struct OriginNode {
    pub kind: OriginKind,
    pub name: Option<String>,
    pub content: String,
    pub span: Span,
}

/// `[Origin] @Html name;` re-emitting a named origin block
#[derive(Debug, Clone, PartialEq)]
pub struct OriginUse {
    pub kind: OriginKind,
    pub name: String,
    pub span: Span,
}

// === Specialization ===

/// Use-site edit attached to a template or custom reference
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Specialization {
    pub target: String,
    pub delete_properties: Vec<String>,
    pub delete_inheritance: Vec<String>,
    /// Ordered; later entries win on key collision
    pub overrides: Vec<Property>,
    /// `@Element Box[i]`: keep only the i-th expanded child
    pub index: Option<usize>,
    pub inserts: Vec<InsertOp>,
    pub delete_elements: Vec<ElementSelector>,
    /// `div[1] { ... }` additions to an existing child
    pub patches: Vec<ElementPatch>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Before,
    After,
    Replace,
    AtTop,
    AtBottom,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertOp {
    pub position: InsertPosition,
    /// Absent for `at top` / `at bottom`
    pub target: Option<ElementSelector>,
    pub content: Vec<Node>,
    pub span: Span,
}

/// `name` (first match) or `name[index]` (index-th child with that name)
#[derive(Debug, Clone, PartialEq)]
pub struct ElementSelector {
    pub name: String,
    pub index: Option<usize>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementPatch {
    pub selector: ElementSelector,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintScope {
    /// References to the target within the block that declares the constraint
    Exact,
    /// Every reference to the target
    Type,
    /// Every reference, whatever its target
    Global,
}

/// Names a specialization may not touch
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub target: String,
    pub scope: ConstraintScope,
    pub names: Vec<String>,
    pub span: Span,
}

impl Constraint {
    pub fn forbids(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}
