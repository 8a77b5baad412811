//! Arithmetic and conditional property values.
//!
//! `width: 100px + 20px;` and `color: width > 50px ? red : blue;` are folded
//! into plain CSS values before emission. Anything the evaluator cannot make
//! sense of is emitted exactly as written.

use std::fmt;

/// Properties already emitted in the same block, readable by name from a condition
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalContext<'a> {
    properties: &'a [(String, String)],
}

impl<'a> EvalContext<'a> {
    pub fn new(properties: &'a [(String, String)]) -> Self {
        Self { properties }
    }

    /// Latest value of a sibling property
    pub fn lookup(&self, name: &str) -> Option<&'a str> {
        self.properties
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

pub trait Evaluator: Send + Sync {
    /// Never fails: unparseable input is returned unchanged
    fn evaluate(&self, expr: &str, ctx: &EvalContext) -> String;
}

/// Unit-aware evaluator used by the generator
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEvaluator;

impl Evaluator for DefaultEvaluator {
    fn evaluate(&self, expr: &str, ctx: &EvalContext) -> String {
        let Some(tokens) = lex(expr) else {
            return expr.to_string();
        };
        let mut parser = ExprParser { tokens, pos: 0, ctx };
        let result = parser.conditional().and_then(|value| {
            if parser.pos == parser.tokens.len() { Ok(value) } else { Err(Failure::Invalid) }
        });
        match result {
            Ok(value) => value.to_string(),
            Err(Failure::IncompatibleUnits) => format!("calc({})", expr.trim()),
            Err(Failure::Invalid) => expr.to_string(),
        }
    }
}

/// True when a property value has an operator the evaluator should fold:
/// a whitespace-delimited arithmetic operator or a `?`, outside parentheses
/// and quotes. A value whose only operator is `/` counts only when it also
/// carries a unit, so `grid-row: 1 / 3` stays as written.
pub fn is_expression(value: &str) -> bool {
    let top = top_level(value);
    if top.contains('?') {
        return true;
    }
    let words: Vec<&str> = top.split_whitespace().collect();
    let mut slash_only = true;
    let mut found = false;
    for (i, word) in words.iter().enumerate() {
        if i == 0 || i + 1 == words.len() {
            continue;
        }
        match *word {
            "+" | "-" | "*" | "%" | "**" => {
                found = true;
                slash_only = false;
            }
            "/" => found = true,
            _ => {}
        }
    }
    if !found {
        return false;
    }
    !slash_only || words.iter().any(|w| has_unit(w))
}

/// Text outside parentheses and quotes; nested content becomes `_`
fn top_level(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut depth = 0usize;
    let mut quote = None;
    for c in value.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                out.push('_');
            }
            (Some(_), _) => out.push('_'),
            (None, '"' | '\'') => {
                quote = Some(c);
                out.push('_');
            }
            (None, '(') => {
                depth += 1;
                out.push('_');
            }
            (None, ')') => {
                depth = depth.saturating_sub(1);
                out.push('_');
            }
            (None, c) if depth > 0 => out.push(if c.is_whitespace() { '_' } else { c }),
            (None, c) => out.push(c),
        }
    }
    out
}

fn has_unit(word: &str) -> bool {
    let digits = word.trim_start_matches(|c: char| c.is_ascii_digit() || c == '.');
    digits.len() < word.len() && !digits.is_empty() && digits.chars().all(|c| c.is_ascii_alphabetic() || c == '%')
}

// === Lexing ===

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Number(f64, String),
    Word(String),
    Op(&'static str),
    Open,
    Close,
}

const OPERATORS: &[&str] = &[
    "**", ">=", "<=", "==", "!=", "&&", "||", "+", "-", "*", "/", "%", ">", "<", "?", ":", ",",
];

fn lex(expr: &str) -> Option<Vec<Tok>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '(' {
            tokens.push(Tok::Open);
            i += 1;
            continue;
        }
        if c == ')' {
            tokens.push(Tok::Close);
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let number: String = chars[start..i].iter().collect();
            let unit_start = i;
            while i < chars.len() && (chars[i].is_ascii_alphabetic() || chars[i] == '%') {
                i += 1;
            }
            let unit: String = chars[unit_start..i].iter().collect();
            tokens.push(Tok::Number(number.parse().ok()?, unit));
            continue;
        }
        if c == '"' || c == '\'' {
            let start = i;
            i += 1;
            while i < chars.len() && chars[i] != c {
                i += 1;
            }
            if i == chars.len() {
                return None;
            }
            i += 1;
            tokens.push(Tok::Word(chars[start..i].iter().collect()));
            continue;
        }
        if c.is_alphabetic() || c == '_' || c == '#' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '-' | '#' | '.')) {
                i += 1;
            }
            tokens.push(Tok::Word(chars[start..i].iter().collect()));
            continue;
        }

        let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
        let op = OPERATORS.iter().find(|op| rest.starts_with(**op))?;
        tokens.push(Tok::Op(op));
        i += op.chars().count();
    }

    Some(tokens)
}

// === Evaluation ===

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Number(f64, String),
    Bool(bool),
    Word(String),
}

impl Value {
    fn truthy(&self) -> bool {
        match self {
            Value::Number(n, _) => *n != 0.0,
            Value::Bool(b) => *b,
            Value::Word(w) => !w.is_empty() && w != "false" && w != "none",
        }
    }

    /// Sibling property values are re-read as literals
    fn from_literal(text: &str) -> Value {
        if let Some(Ok(Tok::Number(n, unit))) = lex(text).map(|tokens| match tokens.as_slice() {
            [single] => Ok(single.clone()),
            _ => Err(()),
        }) {
            return Value::Number(n, unit);
        }
        match text {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::Word(text.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n, unit) => write!(f, "{}{}", format_number(*n), unit),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Word(w) => write!(f, "{}", w),
        }
    }
}

fn format_number(n: f64) -> String {
    let mut s = format!("{:.4}", n);
    if s.contains('.') {
        s = s.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    if s == "-0" { "0".to_string() } else { s }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Invalid,
    IncompatibleUnits,
}

type Eval = Result<Value, Failure>;

struct ExprParser<'c, 'a> {
    tokens: Vec<Tok>,
    pos: usize,
    ctx: &'c EvalContext<'a>,
}

impl ExprParser<'_, '_> {
    fn peek_op(&self, op: &str) -> bool {
        matches!(self.tokens.get(self.pos), Some(Tok::Op(o)) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.peek_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// `c ? a : b` and the chained `c1 ? a, c2 ? b : c`. A false condition
    /// with no alternative yields an empty value.
    fn conditional(&mut self) -> Eval {
        let condition = self.or()?;
        if !self.eat_op("?") {
            return Ok(condition);
        }
        let then = self.or()?;
        let otherwise = if self.eat_op(":") || self.eat_op(",") {
            Some(self.conditional()?)
        } else {
            None
        };
        Ok(if condition.truthy() {
            then
        } else {
            otherwise.unwrap_or(Value::Word(String::new()))
        })
    }

    fn or(&mut self) -> Eval {
        let mut left = self.and()?;
        while self.eat_op("||") {
            let right = self.and()?;
            left = Value::Bool(left.truthy() || right.truthy());
        }
        Ok(left)
    }

    fn and(&mut self) -> Eval {
        let mut left = self.comparison()?;
        while self.eat_op("&&") {
            let right = self.comparison()?;
            left = Value::Bool(left.truthy() && right.truthy());
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Eval {
        let left = self.additive()?;
        for op in [">=", "<=", "==", "!=", ">", "<"] {
            if self.eat_op(op) {
                let right = self.additive()?;
                return compare(op, &left, &right);
            }
        }
        Ok(left)
    }

    fn additive(&mut self) -> Eval {
        let mut left = self.multiplicative()?;
        loop {
            let op = if self.eat_op("+") {
                "+"
            } else if self.eat_op("-") {
                "-"
            } else {
                return Ok(left);
            };
            let right = self.multiplicative()?;
            left = arithmetic(op, left, right)?;
        }
    }

    fn multiplicative(&mut self) -> Eval {
        let mut left = self.power()?;
        loop {
            let op = ["*", "/", "%"].into_iter().find(|op| self.peek_op(op));
            let Some(op) = op else { return Ok(left) };
            self.pos += 1;
            let right = self.power()?;
            left = arithmetic(op, left, right)?;
        }
    }

    fn power(&mut self) -> Eval {
        let base = self.unary()?;
        if self.eat_op("**") {
            let exponent = self.power()?;
            return arithmetic("**", base, exponent);
        }
        Ok(base)
    }

    fn unary(&mut self) -> Eval {
        if self.eat_op("-") {
            return match self.unary()? {
                Value::Number(n, unit) => Ok(Value::Number(-n, unit)),
                _ => Err(Failure::Invalid),
            };
        }
        self.primary()
    }

    fn primary(&mut self) -> Eval {
        let token = self.tokens.get(self.pos).cloned().ok_or(Failure::Invalid)?;
        self.pos += 1;
        match token {
            Tok::Number(n, unit) => Ok(Value::Number(n, unit)),
            Tok::Word(word) => Ok(match self.ctx.lookup(&word) {
                Some(value) => Value::from_literal(value),
                None => Value::from_literal(&word),
            }),
            Tok::Open => {
                let inner = self.conditional()?;
                match self.tokens.get(self.pos) {
                    Some(Tok::Close) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err(Failure::Invalid),
                }
            }
            Tok::Close | Tok::Op(_) => Err(Failure::Invalid),
        }
    }
}

fn merged_unit(left: &str, right: &str) -> Result<String, Failure> {
    match (left.is_empty(), right.is_empty()) {
        (true, _) => Ok(right.to_string()),
        (_, true) => Ok(left.to_string()),
        _ if left == right => Ok(left.to_string()),
        _ => Err(Failure::IncompatibleUnits),
    }
}

fn arithmetic(op: &str, left: Value, right: Value) -> Eval {
    let (Value::Number(a, left_unit), Value::Number(b, right_unit)) = (left, right) else {
        return Err(Failure::Invalid);
    };
    let value = match op {
        "+" => a + b,
        "-" => a - b,
        "*" => a * b,
        "/" if b == 0.0 => return Err(Failure::Invalid),
        "/" => a / b,
        "%" if b == 0.0 => return Err(Failure::Invalid),
        "%" => a % b,
        "**" => a.powf(b),
        _ => return Err(Failure::Invalid),
    };
    // Dividing two lengths of the same unit gives a plain ratio
    let unit = if op == "/" && left_unit == right_unit {
        String::new()
    } else {
        merged_unit(&left_unit, &right_unit)?
    };
    Ok(Value::Number(value, unit))
}

fn compare(op: &str, left: &Value, right: &Value) -> Eval {
    let ordering = match (left, right) {
        (Value::Number(a, left_unit), Value::Number(b, right_unit)) => {
            merged_unit(left_unit, right_unit)?;
            a.partial_cmp(b).ok_or(Failure::Invalid)?
        }
        _ => {
            let (a, b) = (left.to_string(), right.to_string());
            return match op {
                "==" => Ok(Value::Bool(a == b)),
                "!=" => Ok(Value::Bool(a != b)),
                _ => Err(Failure::Invalid),
            };
        }
    };
    use std::cmp::Ordering::*;
    let result = match op {
        ">" => ordering == Greater,
        "<" => ordering == Less,
        ">=" => ordering != Less,
        "<=" => ordering != Greater,
        "==" => ordering == Equal,
        "!=" => ordering != Equal,
        _ => return Err(Failure::Invalid),
    };
    Ok(Value::Bool(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expr: &str) -> String {
        DefaultEvaluator.evaluate(expr, &EvalContext::default())
    }

    #[test]
    fn test_unit_arithmetic() {
        assert_eq!(eval("100px + 20px"), "120px");
        assert_eq!(eval("10px * 3"), "30px");
        assert_eq!(eval("100% / 3"), "33.3333%");
        assert_eq!(eval("2 ** 3 * 2"), "16");
        assert_eq!(eval("(1em + 1em) * 2"), "4em");
        assert_eq!(eval("1.5rem - 0.5rem"), "1rem");
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("2 + 3 * 4"), "14");
        assert_eq!(eval("2 * 3 ** 2"), "18");
        assert_eq!(eval("10 - 4 - 3"), "3");
    }

    #[test]
    fn test_incompatible_units_become_calc() {
        assert_eq!(eval("100% - 20px"), "calc(100% - 20px)");
    }

    #[test]
    fn test_unparseable_input_unchanged() {
        assert_eq!(eval("12px / 1.5 serif"), "12px / 1.5 serif");
        assert_eq!(eval("10px / 0"), "10px / 0");
        assert_eq!(eval("red + 1"), "red + 1");
    }

    #[test]
    fn test_conditional_reads_siblings() {
        let props = vec![("width".to_string(), "80px".to_string())];
        let ctx = EvalContext::new(&props);
        assert_eq!(DefaultEvaluator.evaluate("width > 50px ? red : blue", &ctx), "red");
        assert_eq!(DefaultEvaluator.evaluate("width < 50px ? red : blue", &ctx), "blue");
        assert_eq!(
            DefaultEvaluator.evaluate("width > 100px ? 1px, width > 60px ? 2px : 3px", &ctx),
            "2px"
        );
        assert_eq!(DefaultEvaluator.evaluate("width > 50px && width < 90px ? ok : no", &ctx), "ok");
    }

    #[test]
    fn test_conditional_without_alternative() {
        assert_eq!(eval("1 > 2 ? red"), "");
        assert_eq!(eval("1 < 2 ? red"), "red");
    }

    #[test]
    fn test_is_expression() {
        assert!(is_expression("100px + 20px"));
        assert!(is_expression("width > 50px ? red : blue"));
        assert!(is_expression("100% / 3"));
        assert!(!is_expression("calc(100% - 20px)"));
        assert!(!is_expression("1 / 3"));
        assert!(!is_expression("0 -1px"));
        assert!(!is_expression("\"a + b\""));
        assert!(!is_expression("red"));
    }
}
