//! Per-compilation symbol tables.
//!
//! The tree builder registers every definition here as soon as it is parsed.
//! Nothing is resolved at parse time: the generator looks references up
//! lazily against the fully populated context, so definitions may appear
//! after their first use.

use crate::ast::{
    ConfigurationNode, Constraint, ConstraintScope, DefinitionKind, ElementDefinition, ImportNode,
    OriginKind, OriginNode, Reference, StyleDefinition, VarDefinition,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Name of the configuration created by an unnamed `[Configuration]` block
pub const DEFAULT_CONFIGURATION: &str = "default";

/// Template, custom and origin tables of one scope
#[derive(Debug, Clone, Default)]
pub struct DefinitionTables {
    pub style_templates: HashMap<String, StyleDefinition>,
    pub element_templates: HashMap<String, ElementDefinition>,
    pub var_templates: HashMap<String, VarDefinition>,
    pub custom_styles: HashMap<String, StyleDefinition>,
    pub custom_elements: HashMap<String, ElementDefinition>,
    pub custom_vars: HashMap<String, VarDefinition>,
    pub origins: HashMap<String, OriginNode>,
}

#[derive(Debug, Clone)]
pub struct NamespaceInfo {
    pub name: String,
    /// Full dotted path
    pub path: String,
    /// Path of the enclosing namespace; `None` at top level
    pub parent: Option<String>,
    pub tables: DefinitionTables,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigurationInfo {
    pub name: String,
    pub settings: HashMap<String, String>,
    pub name_map: HashMap<String, Vec<String>>,
}

impl ConfigurationInfo {
    pub fn from_node(node: &ConfigurationNode) -> Self {
        Self {
            name: node.name.clone().unwrap_or_else(|| DEFAULT_CONFIGURATION.to_string()),
            settings: node.settings.iter().cloned().collect(),
            name_map: node.name_map.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportInfo {
    pub kind: Option<String>,
    pub target: String,
    pub from: Option<String>,
    pub alias: Option<String>,
}

impl From<&ImportNode> for ImportInfo {
    fn from(node: &ImportNode) -> Self {
        Self {
            kind: node.kind.clone(),
            target: node.target.clone(),
            from: node.from.clone(),
            alias: node.alias.clone(),
        }
    }
}

/// Symbol tables for a single compilation pass
#[derive(Debug, Clone, Default)]
pub struct CompilationContext {
    root: DefinitionTables,
    namespaces: HashMap<String, NamespaceInfo>,
    configurations: HashMap<String, ConfigurationInfo>,
    active_configuration: Option<String>,
    imports: Vec<ImportInfo>,
    imported_namespaces: Vec<String>,
    namespace_aliases: HashMap<String, String>,
    origin_embeds: Vec<OriginNode>,
    constraints: Vec<Constraint>,
}

impl CompilationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// End of the parse phase: the generator and the per-placeholder
    /// sub-compilations only ever see a shared, read-only context.
    pub fn freeze(self) -> Arc<CompilationContext> {
        Arc::new(self)
    }

    // === Registration ===

    /// Create the namespace if it does not exist yet (re-opening is allowed)
    pub fn declare_namespace(&mut self, path: &str) {
        if path.is_empty() || self.namespaces.contains_key(path) {
            return;
        }
        let (parent, name) = match path.rsplit_once('.') {
            Some((parent, name)) => (Some(parent.to_string()), name.to_string()),
            None => (None, path.to_string()),
        };
        if let Some(parent) = &parent {
            self.declare_namespace(parent);
        }
        self.namespaces.insert(
            path.to_string(),
            NamespaceInfo { name, path: path.to_string(), parent, tables: DefinitionTables::default() },
        );
    }

    fn tables_mut(&mut self, scope: &str) -> &mut DefinitionTables {
        if scope.is_empty() {
            return &mut self.root;
        }
        self.declare_namespace(scope);
        match self.namespaces.get_mut(scope) {
            Some(ns) => &mut ns.tables,
            None => &mut self.root,
        }
    }

    /// Register a style template or custom. Returns `true` when an earlier
    /// definition with the same name in the same scope was replaced.
    pub fn register_style(&mut self, kind: DefinitionKind, definition: StyleDefinition) -> bool {
        let tables = self.tables_mut(&definition.scope.clone());
        let table = match kind {
            DefinitionKind::Template => &mut tables.style_templates,
            DefinitionKind::Custom => &mut tables.custom_styles,
        };
        table.insert(definition.name.clone(), definition).is_some()
    }

    pub fn register_element(&mut self, kind: DefinitionKind, definition: ElementDefinition) -> bool {
        let tables = self.tables_mut(&definition.scope.clone());
        let table = match kind {
            DefinitionKind::Template => &mut tables.element_templates,
            DefinitionKind::Custom => &mut tables.custom_elements,
        };
        table.insert(definition.name.clone(), definition).is_some()
    }

    pub fn register_var(&mut self, kind: DefinitionKind, definition: VarDefinition) -> bool {
        let tables = self.tables_mut(&definition.scope.clone());
        let table = match kind {
            DefinitionKind::Template => &mut tables.var_templates,
            DefinitionKind::Custom => &mut tables.custom_vars,
        };
        table.insert(definition.name.clone(), definition).is_some()
    }

    /// Named origins are addressable later; every origin block is recorded
    /// in the embed list.
    pub fn register_origin(&mut self, scope: &str, origin: OriginNode) {
        if let Some(name) = &origin.name {
            self.tables_mut(scope).origins.insert(name.clone(), origin.clone());
        }
        self.origin_embeds.push(origin);
    }

    /// An unnamed configuration becomes active immediately; named ones wait
    /// for `use @Config Name;`.
    pub fn register_configuration(&mut self, info: ConfigurationInfo) {
        let activate = info.name == DEFAULT_CONFIGURATION && self.active_configuration.is_none();
        let name = info.name.clone();
        self.configurations.insert(name.clone(), info);
        if activate {
            self.active_configuration = Some(name);
        }
    }

    /// Returns `false` when no configuration with that name exists
    pub fn activate_configuration(&mut self, name: &str) -> bool {
        if self.configurations.contains_key(name) {
            self.active_configuration = Some(name.to_string());
            true
        } else {
            false
        }
    }

    pub fn register_import(&mut self, import: ImportInfo) {
        if import.kind.is_none() {
            let namespace = import.from.clone().unwrap_or_else(|| import.target.clone());
            match &import.alias {
                Some(alias) => {
                    self.namespace_aliases.insert(alias.clone(), namespace);
                }
                None => self.imported_namespaces.push(namespace),
            }
        }
        self.imports.push(import);
    }

    /// Only type- and global-scoped constraints live here; exact ones stay
    /// with the block that declared them.
    pub fn add_constraint(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    // === Queries ===

    pub fn namespace(&self, path: &str) -> Option<&NamespaceInfo> {
        self.namespaces.get(path)
    }

    pub fn imports(&self) -> &[ImportInfo] {
        &self.imports
    }

    pub fn origin_embeds(&self) -> &[OriginNode] {
        &self.origin_embeds
    }

    pub fn active_configuration(&self) -> Option<&ConfigurationInfo> {
        self.active_configuration
            .as_ref()
            .and_then(|name| self.configurations.get(name))
    }

    pub fn configuration(&self, name: &str) -> Option<&ConfigurationInfo> {
        self.configurations.get(name)
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.active_configuration()
            .and_then(|config| config.settings.get(key))
            .map(String::as_str)
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(self.setting(key), Some(v) if v.eq_ignore_ascii_case("true") || v == "1")
    }

    /// Number written for the first child in `name[index]` selectors
    pub fn index_base(&self) -> usize {
        self.setting("INDEX_INITIAL_COUNT")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Type constraints naming `target`, plus every global constraint
    pub fn constraints_for<'a>(&'a self, target: &'a str) -> impl Iterator<Item = &'a Constraint> + 'a {
        self.constraints.iter().filter(move |c| match c.scope {
            ConstraintScope::Global => true,
            ConstraintScope::Type => c.target == target || leaf(&c.target) == leaf(target),
            ConstraintScope::Exact => false,
        })
    }

    pub fn lookup_style(&self, reference: &Reference, scope: &str) -> Option<(DefinitionKind, &StyleDefinition)> {
        self.lookup(reference, scope, |tables, leaf| {
            pick(reference.prefer, tables.custom_styles.get(leaf), tables.style_templates.get(leaf))
        })
    }

    pub fn lookup_element(&self, reference: &Reference, scope: &str) -> Option<(DefinitionKind, &ElementDefinition)> {
        self.lookup(reference, scope, |tables, leaf| {
            pick(reference.prefer, tables.custom_elements.get(leaf), tables.element_templates.get(leaf))
        })
    }

    pub fn lookup_var(&self, reference: &Reference, scope: &str) -> Option<(DefinitionKind, &VarDefinition)> {
        self.lookup(reference, scope, |tables, leaf| {
            pick(reference.prefer, tables.custom_vars.get(leaf), tables.var_templates.get(leaf))
        })
    }

    pub fn lookup_origin(&self, kind: OriginKind, name: &str, scope: &str) -> Option<&OriginNode> {
        self.candidate_tables(name, scope)
            .into_iter()
            .find_map(|(tables, leaf)| tables.origins.get(leaf).filter(|o| o.kind == kind))
    }

    fn lookup<'a, T>(
        &'a self,
        reference: &Reference,
        scope: &str,
        find: impl Fn(&'a DefinitionTables, &str) -> Option<T>,
    ) -> Option<T> {
        let qualified = reference.qualified_name();
        self.candidate_tables(&qualified, scope)
            .into_iter()
            .find_map(|(tables, leaf)| find(tables, leaf))
    }

    /// Tables to search, in order, for a possibly-qualified name used from `scope`.
    ///
    /// Unqualified names search the current namespace, then each enclosing
    /// one up to the top level, then imported namespaces. Qualified names
    /// try the qualifier relative to each of those scopes, then as an alias.
    fn candidate_tables<'a, 'n>(&'a self, qualified: &'n str, scope: &str) -> Vec<(&'a DefinitionTables, &'n str)> {
        let mut found = Vec::new();
        let scopes = ancestors(scope);

        match qualified.rsplit_once('.') {
            None => {
                for s in &scopes {
                    if let Some(tables) = self.tables(s) {
                        found.push((tables, qualified));
                    }
                }
                for ns in &self.imported_namespaces {
                    if let Some(tables) = self.tables(ns) {
                        found.push((tables, qualified));
                    }
                }
            }
            Some((qualifier, leaf)) => {
                for s in &scopes {
                    let path = if s.is_empty() { qualifier.to_string() } else { format!("{}.{}", s, qualifier) };
                    if let Some(tables) = self.tables(&path) {
                        found.push((tables, leaf));
                    }
                }
                let (head, rest) = match qualifier.split_once('.') {
                    Some((head, rest)) => (head, Some(rest)),
                    None => (qualifier, None),
                };
                if let Some(target) = self.namespace_aliases.get(head) {
                    let path = match rest {
                        Some(rest) => format!("{}.{}", target, rest),
                        None => target.clone(),
                    };
                    if let Some(tables) = self.tables(&path) {
                        found.push((tables, leaf));
                    }
                }
            }
        }

        found
    }

    fn tables(&self, scope: &str) -> Option<&DefinitionTables> {
        if scope.is_empty() {
            Some(&self.root)
        } else {
            self.namespaces.get(scope).map(|ns| &ns.tables)
        }
    }
}

fn pick<'a, T>(prefer: Option<DefinitionKind>, custom: Option<&'a T>, template: Option<&'a T>) -> Option<(DefinitionKind, &'a T)> {
    let custom = custom.map(|d| (DefinitionKind::Custom, d));
    let template = template.map(|d| (DefinitionKind::Template, d));
    match prefer {
        Some(DefinitionKind::Custom) => custom,
        Some(DefinitionKind::Template) => template,
        None => custom.or(template),
    }
}

/// `A.B.C` -> `["A.B.C", "A.B", "A", ""]`
fn ancestors(scope: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = scope.to_string();
    while !current.is_empty() {
        out.push(current.clone());
        current = match current.rsplit_once('.') {
            Some((parent, _)) => parent.to_string(),
            None => String::new(),
        };
    }
    out.push(String::new());
    out
}

fn leaf(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}
