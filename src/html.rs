/// HTML element classification and escaping for the generator.

/// Void elements: cannot have children or a closing tag.
/// https://html.spec.whatwg.org/multipage/syntax.html#void-elements
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input",
    "link", "meta", "param", "source", "track", "wbr",
];

/// Attributes whose presence alone carries the value
const BOOLEAN_ATTRIBUTES: &[&str] = &[
    "disabled", "checked", "readonly", "required", "autofocus", "autoplay",
    "controls", "loop", "muted", "selected", "open", "hidden", "async",
    "defer", "novalidate", "formnovalidate", "ismap", "multiple", "reversed",
];

pub fn is_void_element(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag.to_ascii_lowercase().as_str())
}

pub fn is_boolean_attribute(name: &str) -> bool {
    BOOLEAN_ATTRIBUTES.contains(&name.to_ascii_lowercase().as_str())
}

/// Escape text content
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape a double-quoted attribute value
pub fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_void_elements() {
        assert!(is_void_element("br"));
        assert!(is_void_element("IMG"));
        assert!(!is_void_element("div"));
    }

    #[test]
    fn test_boolean_attributes() {
        assert!(is_boolean_attribute("Disabled"));
        assert!(!is_boolean_attribute("class"));
    }

    #[test]
    fn test_escaping() {
        assert_eq!(escape_text("a < b && c"), "a &lt; b &amp;&amp; c");
        assert_eq!(escape_attribute("say \"hi\""), "say &quot;hi&quot;");
    }
}
