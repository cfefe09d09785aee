//! Expression evaluation for `literal` values and relation expressions.
//!
//! The compiler only needs a small, side-effect free language: numbers,
//! strings, byte strings, booleans, `None`, named variables, arithmetic and
//! bitwise operators and a handful of builtins. Integer division floors, as
//! pits written for the original scripting runtime expect.

use std::collections::BTreeMap;
use std::fmt;

use roxmltree::Node;

use crate::dom::{DataElement, Dom, Variant};

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl ScriptValue {
    /// Convert to a default value; `None` has no representation.
    #[must_use]
    pub fn into_variant(self) -> Option<Variant> {
        match self {
            Self::None => None,
            Self::Bool(b) => Some(Variant::Bool(b)),
            Self::Int(i) => Some(Variant::Int(i)),
            Self::Float(f) => Some(Variant::Double(f)),
            Self::Str(s) => Some(Variant::String(s)),
            Self::Bytes(b) => Some(Variant::Bytes(b)),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            other => other.as_int().map(|i| i as f64),
        }
    }
}

impl From<&Variant> for ScriptValue {
    fn from(value: &Variant) -> Self {
        match value {
            Variant::Bytes(b) => Self::Bytes(b.clone()),
            Variant::String(s) => Self::Str(s.clone()),
            Variant::Int(i) => Self::Int(*i),
            Variant::UInt(u) => i64::try_from(*u).map_or(Self::Float(*u as f64), Self::Int),
            Variant::Double(d) => Self::Float(*d),
            Variant::Bool(b) => Self::Bool(*b),
        }
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(s) => f.write_str(s),
            Self::Bytes(b) => write!(f, "{}", hex::encode(b)),
        }
    }
}

/// What an expression can see.
#[derive(Debug, Default)]
pub struct EvalScope<'a> {
    /// Element the expression belongs to (`self`).
    pub element: Option<&'a DataElement>,
    /// XML node the expression was read from.
    pub node: Option<Node<'a, 'a>>,
    /// Document being compiled.
    pub document: Option<&'a Dom>,
    pub vars: BTreeMap<String, ScriptValue>,
}

impl<'a> EvalScope<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_var(mut self, name: impl Into<String>, value: ScriptValue) -> Self {
        self.vars.insert(name.into(), value);
        self
    }

    fn lookup(&self, name: &str) -> Option<ScriptValue> {
        if let Some(value) = self.vars.get(name) {
            return Some(value.clone());
        }
        match name {
            "name" => self.element.map(|e| ScriptValue::Str(e.name.clone())),
            "value" => self
                .element
                .and_then(|e| e.default_value.as_ref())
                .map(ScriptValue::from),
            _ => None,
        }
    }
}

/// Evaluates expressions on behalf of the compiler.
pub trait ExpressionEvaluator: Send + Sync {
    fn eval(&self, expr: &str, scope: &EvalScope<'_>) -> Result<ScriptValue, String>;
}

/// Built-in evaluator for the expression subset pits use.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleEvaluator;

impl ExpressionEvaluator for SimpleEvaluator {
    fn eval(&self, expr: &str, scope: &EvalScope<'_>) -> Result<ScriptValue, String> {
        let tokens = tokenize(expr)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            scope,
        };
        let value = parser.expression(0)?;
        match parser.peek() {
            None => Ok(value),
            Some(token) => Err(format!("unexpected token {token} in expression '{expr}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Ident(String),
    Op(&'static str),
    Open,
    Close,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "'{i}'"),
            Self::Float(v) => write!(f, "'{v}'"),
            Self::Str(s) => write!(f, "'\"{s}\"'"),
            Self::Bytes(_) => f.write_str("byte string"),
            Self::Ident(name) => write!(f, "'{name}'"),
            Self::Op(op) => write!(f, "'{op}'"),
            Self::Open => f.write_str("'('"),
            Self::Close => f.write_str("')'"),
            Self::Comma => f.write_str("','"),
        }
    }
}

const OPERATORS: &[&str] = &["//", "<<", ">>", "+", "-", "*", "/", "%", "&", "|", "^", "~"];

fn tokenize(expr: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            tokens.push(parse_number(&text)?);
        } else if (c == 'b' || c == 'B')
            && matches!(chars.get(i + 1), Some('\'') | Some('"'))
        {
            let (text, next) = read_string(&chars, i + 1)?;
            let bytes = text
                .chars()
                .map(|ch| u8::try_from(u32::from(ch)).map_err(|_| "non-byte character in byte string".to_string()))
                .collect::<Result<Vec<u8>, String>>()?;
            tokens.push(Token::Bytes(bytes));
            i = next;
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if c == '\'' || c == '"' {
            let (text, next) = read_string(&chars, i)?;
            tokens.push(Token::Str(text));
            i = next;
        } else if c == '(' {
            tokens.push(Token::Open);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::Close);
            i += 1;
        } else if c == ',' {
            tokens.push(Token::Comma);
            i += 1;
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let op = OPERATORS
                .iter()
                .find(|op| rest.starts_with(**op))
                .ok_or_else(|| format!("unexpected character '{c}'"))?;
            tokens.push(Token::Op(*op));
            i += op.len();
        }
    }

    Ok(tokens)
}

fn parse_number(text: &str) -> Result<Token, String> {
    let lower = text.to_ascii_lowercase();
    let parsed = if let Some(hex) = lower.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).map(Token::Int).ok()
    } else if lower.contains('.') || lower.contains('e') {
        lower.parse().map(Token::Float).ok()
    } else {
        lower.trim_end_matches('l').parse().map(Token::Int).ok()
    };
    parsed.ok_or_else(|| format!("invalid number literal '{text}'"))
}

/// Read a quoted string starting at the opening quote.
fn read_string(chars: &[char], start: usize) -> Result<(String, usize), String> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            c if c == quote => return Ok((out, i + 1)),
            '\\' => {
                let escaped = chars.get(i + 1).ok_or("unterminated escape")?;
                match escaped {
                    'n' => out.push('\n'),
                    'r' => out.push('\r'),
                    't' => out.push('\t'),
                    '0' => out.push('\0'),
                    'x' => {
                        let digits: String = chars.get(i + 2..i + 4).unwrap_or_default().iter().collect();
                        let code = u8::from_str_radix(&digits, 16)
                            .map_err(|_| format!("invalid \\x escape '\\x{digits}'"))?;
                        out.push(char::from(code));
                        i += 2;
                    }
                    other => out.push(*other),
                }
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err("unterminated string literal".to_string())
}

struct Parser<'t, 's> {
    tokens: &'t [Token],
    pos: usize,
    scope: &'s EvalScope<'s>,
}

fn binding_power(op: &str) -> Option<u8> {
    Some(match op {
        "|" => 1,
        "^" => 2,
        "&" => 3,
        "<<" | ">>" => 4,
        "+" | "-" => 5,
        "*" | "/" | "//" | "%" => 6,
        _ => return None,
    })
}

impl Parser<'_, '_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), String> {
        match self.next() {
            Some(ref token) if token == expected => Ok(()),
            Some(token) => Err(format!("expected {expected}, found {token}")),
            None => Err(format!("expected {expected}, found end of expression")),
        }
    }

    fn expression(&mut self, min_power: u8) -> Result<ScriptValue, String> {
        let mut left = self.unary()?;
        while let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            let Some(power) = binding_power(op) else {
                break;
            };
            if power <= min_power {
                break;
            }
            self.pos += 1;
            let right = self.expression(power)?;
            left = apply_binary(op, left, right)?;
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<ScriptValue, String> {
        match self.peek() {
            Some(Token::Op("-")) => {
                self.pos += 1;
                match self.unary()? {
                    ScriptValue::Float(f) => Ok(ScriptValue::Float(-f)),
                    v => v
                        .as_int()
                        .and_then(i64::checked_neg)
                        .map(ScriptValue::Int)
                        .ok_or_else(|| format!("bad operand type for unary -: '{}'", v.type_name())),
                }
            }
            Some(Token::Op("+")) => {
                self.pos += 1;
                self.unary()
            }
            Some(Token::Op("~")) => {
                self.pos += 1;
                let v = self.unary()?;
                v.as_int()
                    .map(|i| ScriptValue::Int(!i))
                    .ok_or_else(|| format!("bad operand type for unary ~: '{}'", v.type_name()))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<ScriptValue, String> {
        match self.next() {
            Some(Token::Int(i)) => Ok(ScriptValue::Int(i)),
            Some(Token::Float(f)) => Ok(ScriptValue::Float(f)),
            Some(Token::Str(s)) => Ok(ScriptValue::Str(s)),
            Some(Token::Bytes(b)) => Ok(ScriptValue::Bytes(b)),
            Some(Token::Open) => {
                let value = self.expression(0)?;
                self.expect(&Token::Close)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::Open) {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::Close) {
                        loop {
                            args.push(self.expression(0)?);
                            if self.peek() == Some(&Token::Comma) {
                                self.pos += 1;
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(&Token::Close)?;
                    return call_builtin(&name, args);
                }
                match name.as_str() {
                    "True" => Ok(ScriptValue::Bool(true)),
                    "False" => Ok(ScriptValue::Bool(false)),
                    "None" => Ok(ScriptValue::None),
                    _ => self
                        .scope
                        .lookup(&name)
                        .ok_or_else(|| format!("name '{name}' is not defined")),
                }
            }
            Some(token) => Err(format!("unexpected token {token}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn call_builtin(name: &str, args: Vec<ScriptValue>) -> Result<ScriptValue, String> {
    let [arg]: [ScriptValue; 1] = args
        .try_into()
        .map_err(|_| format!("{name}() takes exactly one argument"))?;
    match name {
        "len" => match &arg {
            ScriptValue::Str(s) => Ok(ScriptValue::Int(s.chars().count() as i64)),
            ScriptValue::Bytes(b) => Ok(ScriptValue::Int(b.len() as i64)),
            other => Err(format!("object of type '{}' has no len()", other.type_name())),
        },
        "str" => Ok(ScriptValue::Str(arg.to_string())),
        "int" => match &arg {
            ScriptValue::Str(s) => s
                .trim()
                .parse()
                .map(ScriptValue::Int)
                .map_err(|_| format!("invalid literal for int(): '{s}'")),
            ScriptValue::Float(f) => Ok(ScriptValue::Int(f.trunc() as i64)),
            other => other
                .as_int()
                .map(ScriptValue::Int)
                .ok_or_else(|| format!("int() argument must not be '{}'", other.type_name())),
        },
        _ => Err(format!("name '{name}' is not defined")),
    }
}

fn floor_div(a: i64, b: i64) -> Result<i64, String> {
    if b == 0 {
        return Err("integer division or modulo by zero".to_string());
    }
    let q = a.checked_div(b).ok_or("integer overflow")?;
    Ok(if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q })
}

fn floor_mod(a: i64, b: i64) -> Result<i64, String> {
    if b == 0 {
        return Err("integer division or modulo by zero".to_string());
    }
    let r = a.checked_rem(b).ok_or("integer overflow")?;
    Ok(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
}

fn apply_binary(op: &str, left: ScriptValue, right: ScriptValue) -> Result<ScriptValue, String> {
    use ScriptValue::{Bytes, Float, Int, Str};

    let unsupported = |l: &ScriptValue, r: &ScriptValue| {
        format!(
            "unsupported operand type(s) for {op}: '{}' and '{}'",
            l.type_name(),
            r.type_name()
        )
    };

    match (op, &left, &right) {
        ("+", Str(a), Str(b)) => return Ok(Str(format!("{a}{b}"))),
        ("+", Bytes(a), Bytes(b)) => return Ok(Bytes([a.as_slice(), b.as_slice()].concat())),
        ("*", Str(s), n) | ("*", n, Str(s)) if n.as_int().is_some() => {
            let count = usize::try_from(n.as_int().unwrap_or(0)).unwrap_or(0);
            return Ok(Str(s.repeat(count)));
        }
        _ => {}
    }

    if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
        let overflow = || "integer overflow".to_string();
        let value = match op {
            "+" => a.checked_add(b).ok_or_else(overflow)?,
            "-" => a.checked_sub(b).ok_or_else(overflow)?,
            "*" => a.checked_mul(b).ok_or_else(overflow)?,
            "/" | "//" => floor_div(a, b)?,
            "%" => floor_mod(a, b)?,
            "&" => a & b,
            "|" => a | b,
            "^" => a ^ b,
            "<<" | ">>" => {
                let shift = u32::try_from(b).map_err(|_| "negative shift count".to_string())?;
                if op == "<<" {
                    a.checked_shl(shift).ok_or_else(overflow)?
                } else {
                    a.checked_shr(shift).unwrap_or(if a < 0 { -1 } else { 0 })
                }
            }
            _ => return Err(unsupported(&left, &right)),
        };
        return Ok(Int(value));
    }

    if let (Some(a), Some(b)) = (left.as_float(), right.as_float()) {
        let value = match op {
            "+" => a + b,
            "-" => a - b,
            "*" => a * b,
            "/" | "//" | "%" if b == 0.0 => return Err("float division by zero".to_string()),
            "/" => a / b,
            "//" => (a / b).floor(),
            "%" => a - b * (a / b).floor(),
            _ => return Err(unsupported(&left, &right)),
        };
        return Ok(Float(value));
    }

    Err(unsupported(&left, &right))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expr: &str) -> Result<ScriptValue, String> {
        SimpleEvaluator.eval(expr, &EvalScope::new())
    }

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(eval("1 + 2 * 3"), Ok(ScriptValue::Int(7)));
        assert_eq!(eval("(1 + 2) * 3"), Ok(ScriptValue::Int(9)));
        assert_eq!(eval("0x10 | 1 << 2"), Ok(ScriptValue::Int(0x14)));
        assert_eq!(eval("-7 / 2"), Ok(ScriptValue::Int(-4)));
        assert_eq!(eval("-7 % 3"), Ok(ScriptValue::Int(2)));
        assert_eq!(eval("~0"), Ok(ScriptValue::Int(-1)));
    }

    #[test]
    fn test_strings_and_bytes() {
        assert_eq!(eval("'ab' + \"cd\""), Ok(ScriptValue::Str("abcd".into())));
        assert_eq!(eval("'ab' * 3"), Ok(ScriptValue::Str("ababab".into())));
        assert_eq!(eval("b'\\x01\\x02'"), Ok(ScriptValue::Bytes(vec![1, 2])));
        assert_eq!(eval("len('hello')"), Ok(ScriptValue::Int(5)));
        assert_eq!(eval("int('42') + 1"), Ok(ScriptValue::Int(43)));
    }

    #[test]
    fn test_keywords() {
        assert_eq!(eval("None"), Ok(ScriptValue::None));
        assert_eq!(eval("True + 1"), Ok(ScriptValue::Int(2)));
        assert_eq!(eval("1.5 * 2"), Ok(ScriptValue::Float(3.0)));
    }

    #[test]
    fn test_variables() {
        let scope = EvalScope::new().with_var("size", ScriptValue::Int(12));
        assert_eq!(
            SimpleEvaluator.eval("size / 4 + 1", &scope),
            Ok(ScriptValue::Int(4))
        );
        assert!(SimpleEvaluator.eval("count", &scope).is_err());
    }

    #[test]
    fn test_errors() {
        assert!(eval("1 / 0").is_err());
        assert!(eval("1 +").is_err());
        assert!(eval("(1").is_err());
        assert!(eval("'a' - 1").is_err());
        assert!(eval("1 $ 2").is_err());
        assert!(eval("1 2").is_err());
    }

    #[test]
    fn test_into_variant() {
        assert_eq!(ScriptValue::None.into_variant(), None);
        assert_eq!(
            ScriptValue::Int(3).into_variant(),
            Some(Variant::Int(3))
        );
    }
}
