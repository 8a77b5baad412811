//! Contextual keyword spellings.
//!
//! The lexer only tags words; whether a word acts as a keyword is decided
//! here, because a `[Configuration]` block's `[Name]` section can rename
//! keywords for the rest of the document.

use crate::context::ConfigurationInfo;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Text,
    Style,
    Script,
    Use,
    Delete,
    Insert,
    Inherit,
    Except,
    From,
    As,
    Before,
    After,
    Replace,
    /// `@Style`
    StyleType,
    /// `@Element`
    ElementType,
    /// `@Var`
    VarType,
}

const ALL: &[Keyword] = &[
    Keyword::Text,
    Keyword::Style,
    Keyword::Script,
    Keyword::Use,
    Keyword::Delete,
    Keyword::Insert,
    Keyword::Inherit,
    Keyword::Except,
    Keyword::From,
    Keyword::As,
    Keyword::Before,
    Keyword::After,
    Keyword::Replace,
    Keyword::StyleType,
    Keyword::ElementType,
    Keyword::VarType,
];

impl Keyword {
    /// Key used in a `[Name]` configuration section
    pub fn config_key(&self) -> &'static str {
        match self {
            Keyword::Text => "KEYWORD_TEXT",
            Keyword::Style => "KEYWORD_STYLE",
            Keyword::Script => "KEYWORD_SCRIPT",
            Keyword::Use => "KEYWORD_USE",
            Keyword::Delete => "KEYWORD_DELETE",
            Keyword::Insert => "KEYWORD_INSERT",
            Keyword::Inherit => "KEYWORD_INHERIT",
            Keyword::Except => "KEYWORD_EXCEPT",
            Keyword::From => "KEYWORD_FROM",
            Keyword::As => "KEYWORD_AS",
            Keyword::Before => "KEYWORD_BEFORE",
            Keyword::After => "KEYWORD_AFTER",
            Keyword::Replace => "KEYWORD_REPLACE",
            Keyword::StyleType => "CUSTOM_STYLE",
            Keyword::ElementType => "CUSTOM_ELEMENT",
            Keyword::VarType => "CUSTOM_VAR",
        }
    }

    pub fn default_spelling(&self) -> &'static str {
        match self {
            Keyword::Text => "text",
            Keyword::Style => "style",
            Keyword::Script => "script",
            Keyword::Use => "use",
            Keyword::Delete => "delete",
            Keyword::Insert => "insert",
            Keyword::Inherit => "inherit",
            Keyword::Except => "except",
            Keyword::From => "from",
            Keyword::As => "as",
            Keyword::Before => "before",
            Keyword::After => "after",
            Keyword::Replace => "replace",
            Keyword::StyleType => "@Style",
            Keyword::ElementType => "@Element",
            Keyword::VarType => "@Var",
        }
    }
}

/// Accepted spellings for every contextual keyword
#[derive(Debug, Clone)]
pub struct KeywordTable {
    spellings: HashMap<Keyword, Vec<String>>,
}

impl Default for KeywordTable {
    fn default() -> Self {
        let spellings = ALL
            .iter()
            .map(|kw| (*kw, vec![kw.default_spelling().to_string()]))
            .collect();
        Self { spellings }
    }
}

impl KeywordTable {
    /// Defaults overridden by the configuration's `[Name]` section.
    /// A remapped keyword accepts only its configured spellings.
    pub fn from_configuration(config: Option<&ConfigurationInfo>) -> Self {
        let mut table = Self::default();
        let Some(config) = config else {
            return table;
        };
        for kw in ALL {
            if let Some(words) = config.name_map.get(kw.config_key()) {
                let words: Vec<String> = words
                    .iter()
                    .map(|w| w.trim().to_string())
                    .filter(|w| !w.is_empty())
                    .collect();
                if !words.is_empty() {
                    table.spellings.insert(*kw, words);
                }
            }
        }
        table
    }

    pub fn matches(&self, keyword: Keyword, word: &str) -> bool {
        self.spellings
            .get(&keyword)
            .is_some_and(|words| words.iter().any(|w| w == word))
    }

    /// First accepted spelling, for error messages
    pub fn spelling(&self, keyword: Keyword) -> &str {
        self.spellings
            .get(&keyword)
            .and_then(|words| words.first())
            .map(String::as_str)
            .unwrap_or(keyword.default_spelling())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let table = KeywordTable::default();
        assert!(table.matches(Keyword::Delete, "delete"));
        assert!(table.matches(Keyword::StyleType, "@Style"));
        assert!(!table.matches(Keyword::Delete, "remove"));
    }

    #[test]
    fn test_remap_from_configuration() {
        let mut config = ConfigurationInfo::default();
        config
            .name_map
            .insert("KEYWORD_DELETE".to_string(), vec!["remove".to_string(), "drop".to_string()]);
        config
            .name_map
            .insert("CUSTOM_STYLE".to_string(), vec!["@Style".to_string(), "@CSS".to_string()]);

        let table = KeywordTable::from_configuration(Some(&config));
        assert!(table.matches(Keyword::Delete, "remove"));
        assert!(table.matches(Keyword::Delete, "drop"));
        assert!(!table.matches(Keyword::Delete, "delete"));
        assert!(table.matches(Keyword::StyleType, "@CSS"));
        assert_eq!(table.spelling(Keyword::Delete), "remove");
        assert!(table.matches(Keyword::Insert, "insert"));
    }
}
