use super::GenerateResult;
use crate::error::{GenerateError, GenerateFailure};
use tracing::warn;

/// Output buffer for the three generated channels, plus the warnings and
/// errors collected along the way
#[derive(Debug, Default)]
pub struct Output {
    html: String,
    css: String,
    js: Vec<String>,
    warnings: Vec<String>,
    errors: Vec<GenerateError>,
}

impl Output {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_html(&mut self, text: &str) {
        self.html.push_str(text);
    }

    /// Current length of the HTML channel, for `separate_from`
    pub fn html_mark(&self) -> usize {
        self.html.len()
    }

    /// Put a line break at `mark` when something was written since then and
    /// something came before it
    pub fn separate_from(&mut self, mark: usize) {
        if mark > 0
            && self.html.len() > mark
            && !self.html[..mark].ends_with('\n')
            && !self.html[mark..].starts_with('\n')
        {
            self.html.insert(mark, '\n');
        }
    }

    /// `selector {\n  prop: value;\n}\n`; empty rules are dropped
    pub fn push_rule(&mut self, selector: &str, declarations: &[(String, String)]) {
        if declarations.is_empty() {
            return;
        }
        self.css.push_str(selector);
        self.css.push_str(" {\n");
        for (name, value) in declarations {
            self.css.push_str("  ");
            self.css.push_str(name);
            self.css.push_str(": ");
            self.css.push_str(value);
            self.css.push_str(";\n");
        }
        self.css.push_str("}\n");
    }

    pub fn push_script(&mut self, code: &str) {
        let code = code.trim();
        if !code.is_empty() {
            self.js.push(code.to_string());
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.warnings.push(message);
    }

    pub fn error(&mut self, error: GenerateError) {
        self.errors.push(error);
    }

    /// Move the HTML written so far out of the buffer
    pub fn take_html(&mut self) -> String {
        std::mem::take(&mut self.html)
    }

    /// Pull the first recorded error, if any
    pub fn take_first_error(&mut self) -> Option<GenerateError> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.remove(0))
        }
    }

    /// Finish and return the generated channels, or every error together
    /// with what the rest of the document produced
    pub fn finish(self) -> Result<GenerateResult, GenerateFailure> {
        let result = GenerateResult {
            html: self.html,
            css: self.css,
            js: self.js.join("\n"),
            warnings: self.warnings,
        };
        if self.errors.is_empty() {
            Ok(result)
        } else {
            Err(GenerateFailure { errors: self.errors, partial: result })
        }
    }
}
