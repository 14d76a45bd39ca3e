//! The pure, total expression language used by `DerivedValue` clauses,
//! `Conditional` predicates, and (via [`render_template`]) `ValueAssignment`
//! templates. See SPEC_FULL.md §4.B.
//!
//! Evaluation never panics and never performs I/O. An unresolved
//! `${source.x}` placeholder evaluates to JSON null rather than erroring;
//! a type mismatch in an arithmetic operation is the one case that produces
//! an `Err`, which the caller treats as "this clause failed, skip it".

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use super::path;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Ident(String),
    Placeholder(String),
    LParen,
    RParen,
    Comma,
    Op(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '$' && chars.get(i + 1) == Some(&'{') {
            let start = i + 2;
            let mut j = start;
            while j < chars.len() && chars[j] != '}' {
                j += 1;
            }
            if j >= chars.len() {
                return Err("unterminated ${...} placeholder".to_string());
            }
            let inner: String = chars[start..j].iter().collect();
            let path = inner
                .strip_prefix("source.")
                .ok_or_else(|| format!("placeholder '{inner}' must start with 'source.'"))?;
            tokens.push(Token::Placeholder(path.to_string()));
            i = j + 1;
            continue;
        }
        if c == '"' {
            let mut j = i + 1;
            let mut s = String::new();
            while j < chars.len() && chars[j] != '"' {
                s.push(chars[j]);
                j += 1;
            }
            if j >= chars.len() {
                return Err("unterminated string literal".to_string());
            }
            tokens.push(Token::Str(s));
            i = j + 1;
            continue;
        }
        if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()) && starts_number(&tokens)) {
            let start = i;
            let mut j = i + 1;
            while j < chars.len() && (chars[j].is_ascii_digit() || chars[j] == '.') {
                j += 1;
            }
            let lit: String = chars[start..j].iter().collect();
            let n: f64 = lit
                .parse()
                .map_err(|_| format!("invalid numeric literal '{lit}'"))?;
            tokens.push(Token::Number(n));
            i = j;
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            let mut j = i;
            while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                j += 1;
            }
            let ident: String = chars[start..j].iter().collect();
            match ident.as_str() {
                "true" => tokens.push(Token::Bool(true)),
                "false" => tokens.push(Token::Bool(false)),
                "null" => tokens.push(Token::Null),
                _ => tokens.push(Token::Ident(ident)),
            }
            i = j;
            continue;
        }
        if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
            continue;
        }
        if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
            continue;
        }
        if c == ',' {
            tokens.push(Token::Comma);
            i += 1;
            continue;
        }
        let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
        if ["==", "!=", ">=", "<="].contains(&two.as_str()) {
            tokens.push(Token::Op(two));
            i += 2;
            continue;
        }
        if ['+', '-', '*', '/', '>', '<'].contains(&c) {
            tokens.push(Token::Op(c.to_string()));
            i += 1;
            continue;
        }
        return Err(format!("unexpected character '{c}' in expression"));
    }
    Ok(tokens)
}

/// A leading `-` is a unary-minus number literal only at the start of the
/// expression or right after another operator/paren/comma.
fn starts_number(tokens: &[Token]) -> bool {
    !matches!(
        tokens.last(),
        Some(Token::Number(_)) | Some(Token::Str(_)) | Some(Token::Placeholder(_)) | Some(Token::RParen)
    )
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Placeholder(String),
    Call(String, Vec<Expr>),
    Binary(String, Box<Expr>, Box<Expr>),
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn parse_expr(&mut self) -> Result<Expr, String> {
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let left = self.parse_additive()?;
        if let Some(Token::Op(op)) = self.peek() {
            if ["==", "!=", ">", ">=", "<", "<="].contains(&op.as_str()) {
                let op = op.clone();
                self.advance();
                let right = self.parse_additive()?;
                return Ok(Expr::Binary(op, Box::new(left), Box::new(right)));
            }
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_multiplicative()?;
        while let Some(Token::Op(op)) = self.peek() {
            if op == "+" || op == "-" {
                let op = op.clone();
                self.advance();
                let right = self.parse_multiplicative()?;
                left = Expr::Binary(op, Box::new(left), Box::new(right));
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_primary()?;
        while let Some(Token::Op(op)) = self.peek() {
            if op == "*" || op == "/" {
                let op = op.clone();
                self.advance();
                let right = self.parse_primary()?;
                left = Expr::Binary(op, Box::new(left), Box::new(right));
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Bool(b)) => Ok(Expr::Bool(b)),
            Some(Token::Null) => Ok(Expr::Null),
            Some(Token::Placeholder(p)) => Ok(Expr::Placeholder(p)),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("expected closing parenthesis".to_string()),
                }
            }
            Some(Token::Ident(name)) => {
                match self.advance() {
                    Some(Token::LParen) => {}
                    _ => return Err(format!("expected '(' after function name '{name}'")),
                }
                let mut args = Vec::new();
                if self.peek() != Some(&Token::RParen) {
                    loop {
                        args.push(self.parse_expr()?);
                        match self.peek() {
                            Some(Token::Comma) => {
                                self.advance();
                            }
                            _ => break,
                        }
                    }
                }
                match self.advance() {
                    Some(Token::RParen) => {}
                    _ => return Err(format!("expected closing ')' in call to '{name}'")),
                }
                Ok(Expr::Call(name, args))
            }
            other => Err(format!("unexpected token in expression: {other:?}")),
        }
    }
}

fn parse(input: &str) -> Result<Expr, String> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(format!("unexpected trailing tokens in expression '{input}'"));
    }
    Ok(expr)
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn eval_node(node: &Expr, source: &Value) -> Result<Value, String> {
    match node {
        Expr::Number(n) => Ok(Value::from(*n)),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Null => Ok(Value::Null),
        Expr::Placeholder(p) => Ok(path::get(source, p).cloned().unwrap_or(Value::Null)),
        Expr::Call(name, args) => eval_call(name, args, source),
        Expr::Binary(op, left, right) => {
            let l = eval_node(left, source)?;
            let r = eval_node(right, source)?;
            eval_binary(op, &l, &r)
        }
    }
}

fn eval_call(name: &str, args: &[Expr], source: &Value) -> Result<Value, String> {
    match name {
        "uuid" => Ok(Value::String(Uuid::new_v4().to_string())),
        "timestamp" => Ok(Value::String(Utc::now().to_rfc3339())),
        "upper" => {
            let v = eval_node(args.first().ok_or("upper() requires 1 argument")?, source)?;
            Ok(Value::String(as_string(&v).to_uppercase()))
        }
        "lower" => {
            let v = eval_node(args.first().ok_or("lower() requires 1 argument")?, source)?;
            Ok(Value::String(as_string(&v).to_lowercase()))
        }
        "substring" => {
            if args.len() != 3 {
                return Err("substring() requires 3 arguments".to_string());
            }
            let s = as_string(&eval_node(&args[0], source)?);
            let start = as_f64(&eval_node(&args[1], source)?).ok_or("substring() start must be numeric")? as usize;
            let end = as_f64(&eval_node(&args[2], source)?).ok_or("substring() end must be numeric")? as usize;
            let chars: Vec<char> = s.chars().collect();
            let start = start.min(chars.len());
            let end = end.min(chars.len()).max(start);
            Ok(Value::String(chars[start..end].iter().collect()))
        }
        other => Err(format!("unknown function '{other}'")),
    }
}

fn eval_binary(op: &str, left: &Value, right: &Value) -> Result<Value, String> {
    match op {
        "+" => {
            if let (Value::String(_), _) | (_, Value::String(_)) = (left, right) {
                if as_f64(left).is_some() && as_f64(right).is_some() && !matches!(left, Value::String(_)) && !matches!(right, Value::String(_))
                {
                    // both numeric-looking but neither is a string: fall through to numeric add below
                } else if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
                    return Ok(Value::String(format!("{}{}", as_string(left), as_string(right))));
                }
            }
            let l = as_f64(left).ok_or_else(|| "left operand of '+' is not numeric or string".to_string())?;
            let r = as_f64(right).ok_or_else(|| "right operand of '+' is not numeric or string".to_string())?;
            Ok(Value::from(l + r))
        }
        "-" | "*" | "/" => {
            let l = as_f64(left).ok_or_else(|| format!("left operand of '{op}' is not numeric"))?;
            let r = as_f64(right).ok_or_else(|| format!("right operand of '{op}' is not numeric"))?;
            let result = match op {
                "-" => l - r,
                "*" => l * r,
                "/" => {
                    if r == 0.0 {
                        return Err("division by zero".to_string());
                    }
                    l / r
                }
                _ => unreachable!(),
            };
            Ok(Value::from(result))
        }
        "==" => Ok(Value::Bool(values_equal(left, right))),
        "!=" => Ok(Value::Bool(!values_equal(left, right))),
        ">" | ">=" | "<" | "<=" => {
            let l = as_f64(left).ok_or_else(|| format!("left operand of '{op}' is not numeric"))?;
            let r = as_f64(right).ok_or_else(|| format!("right operand of '{op}' is not numeric"))?;
            let result = match op {
                ">" => l > r,
                ">=" => l >= r,
                "<" => l < r,
                "<=" => l <= r,
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        other => Err(format!("unknown operator '{other}'")),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    if let (Some(l), Some(r)) = (as_f64(left), as_f64(right)) {
        if !matches!(left, Value::String(_)) || !matches!(right, Value::String(_)) {
            return l == r;
        }
    }
    left == right
}

/// Evaluates a full expression (used by `DerivedValue` and `Conditional`).
pub fn eval_expression(expression: &str, source: &Value) -> Result<Value, String> {
    let ast = parse(expression)?;
    eval_node(&ast, source)
}

/// Evaluates a predicate expression, coercing the result to `bool`.
pub fn eval_predicate(expression: &str, source: &Value) -> Result<bool, String> {
    match eval_expression(expression, source)? {
        Value::Bool(b) => Ok(b),
        other => Err(format!("predicate '{expression}' did not evaluate to a boolean, got {other}")),
    }
}

/// Renders a `ValueAssignment` "literal-or-template" value. A template that
/// parses whole as an expression (a quoted/numeric/boolean/null literal, a
/// single placeholder, or any other legal expression) is evaluated as such,
/// preserving its JSON type. Otherwise it is treated as free text that may
/// contain `${source.path}` placeholders, each substituted as a string and
/// concatenated with the surrounding literal text.
pub fn render_template(template: &str, source: &Value) -> Value {
    if let Ok(value) = eval_expression(template, source) {
        return value;
    }

    let mut output = String::new();
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '$' && chars.get(i + 1) == Some(&'{') {
            let start = i + 2;
            let mut j = start;
            while j < chars.len() && chars[j] != '}' {
                j += 1;
            }
            if j < chars.len() {
                let inner: String = chars[start..j].iter().collect();
                if let Some(path) = inner.strip_prefix("source.") {
                    let value = path::get(source, path).cloned().unwrap_or(Value::Null);
                    output.push_str(&as_string(&value));
                }
                i = j + 1;
                continue;
            }
        }
        output.push(chars[i]);
        i += 1;
    }
    Value::String(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn placeholder_substitution() {
        let source = json!({"amount": 100});
        let result = eval_expression("${source.amount}", &source).unwrap();
        assert_eq!(result, json!(100.0));
    }

    #[test]
    fn unresolved_placeholder_is_null_not_error() {
        let source = json!({});
        let result = eval_expression("${source.missing}", &source).unwrap();
        assert_eq!(result, Value::Null);
    }

    #[test]
    fn numeric_arithmetic() {
        let source = json!({"a": 10, "b": 5});
        let result = eval_expression("${source.a} + ${source.b} * 2", &source).unwrap();
        assert_eq!(result, json!(20.0));
    }

    #[test]
    fn string_concatenation_with_plus() {
        let source = json!({"first": "foo", "second": "bar"});
        let result = eval_expression("${source.first} + ${source.second}", &source).unwrap();
        assert_eq!(result, json!("foobar"));
    }

    #[test]
    fn comparison_operators() {
        let source = json!({"amount": 100});
        assert_eq!(eval_predicate("${source.amount} > 50", &source).unwrap(), true);
        assert_eq!(eval_predicate("${source.amount} <= 50", &source).unwrap(), false);
    }

    #[test]
    fn string_that_parses_as_number_coerces_in_arithmetic() {
        let source = json!({"amount": "10"});
        let result = eval_expression("${source.amount} + 5", &source).unwrap();
        assert_eq!(result, json!(15.0));
    }

    #[test]
    fn non_numeric_string_arithmetic_fails() {
        let source = json!({"amount": "not-a-number"});
        assert!(eval_expression("${source.amount} - 5", &source).is_err());
    }

    #[test]
    fn function_calls() {
        let source = json!({"name": "hello"});
        assert_eq!(eval_expression("upper(${source.name})", &source).unwrap(), json!("HELLO"));
        assert_eq!(eval_expression("substring(${source.name}, 0, 2)", &source).unwrap(), json!("he"));
    }

    #[test]
    fn render_template_preserves_type_for_single_placeholder() {
        let source = json!({"amount": 42});
        let rendered = render_template("${source.amount}", &source);
        assert_eq!(rendered, json!(42));
    }

    #[test]
    fn render_template_concatenates_literal_and_placeholder() {
        let source = json!({"id": "ABC"});
        let rendered = render_template("REF-${source.id}-END", &source);
        assert_eq!(rendered, json!("REF-ABC-END"));
    }
}
