/*!
 * Sandboxed expression evaluation.
 *
 * Command templates, skip-conditions, and response effects may carry computed
 * values marked with an `eval:` prefix. This module evaluates that text with
 * a deliberately narrow grammar: arithmetic, comparisons, boolean logic,
 * string literals, and a fixed allow-list of functions. Anything outside the
 * grammar is rejected; there is no variable binding, no indexing, and no way
 * to reach host functionality.
 */
use thiserror::Error;

use crate::types::Value;

/// Error type for expression evaluation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    /// The input could not be parsed
    #[error("Expression parse error: {0}")]
    Parse(String),

    /// A function outside the allow-list was called
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    /// An operator or function was applied to an unsupported type
    #[error("Expression type error: {0}")]
    Type(String),

    /// Division or modulo by zero
    #[error("Division by zero")]
    DivisionByZero,
}

/// Result type for expression evaluation
pub type Result<T> = std::result::Result<T, ExprError>;

/// Evaluate an expression to a [`Value`]
pub fn evaluate(input: &str) -> Result<Value> {
    let tokens = tokenize(input)?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expression()?;
    parser.expect_end()?;
    eval(&expr)
}

/// Evaluate an expression that must produce a boolean
pub fn evaluate_bool(input: &str) -> Result<bool> {
    match evaluate(input)? {
        Value::Bool(b) => Ok(b),
        other => Err(ExprError::Type(format!(
            "expected a boolean result, got {:?}",
            other
        ))),
    }
}

/// Evaluate an expression that must produce a number
pub fn evaluate_number(input: &str) -> Result<f64> {
    let value = evaluate(input)?;
    value.as_float().ok_or_else(|| {
        ExprError::Type(format!("expected a numeric result, got {:?}", value))
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Integer(i64),
    Float(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut text = String::new();
                let mut is_float = false;
                while let Some(&d) = chars.peek() {
                    match d {
                        '0'..='9' => {
                            text.push(d);
                            chars.next();
                        }
                        '.' => {
                            if is_float {
                                return Err(ExprError::Parse(format!(
                                    "malformed number near '{}'",
                                    text
                                )));
                            }
                            is_float = true;
                            text.push(d);
                            chars.next();
                        }
                        _ => break,
                    }
                }
                if is_float {
                    let v = text.parse().map_err(|_| {
                        ExprError::Parse(format!("malformed number '{}'", text))
                    })?;
                    tokens.push(Token::Float(v));
                } else {
                    let v = text.parse().map_err(|_| {
                        ExprError::Parse(format!("malformed number '{}'", text))
                    })?;
                    tokens.push(Token::Integer(v));
                }
            }
            '\'' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                for d in chars.by_ref() {
                    if d == '\'' {
                        closed = true;
                        break;
                    }
                    text.push(d);
                }
                if !closed {
                    return Err(ExprError::Parse("unterminated string literal".to_string()));
                }
                tokens.push(Token::Str(text));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut text = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match text.as_str() {
                    "true" => tokens.push(Token::True),
                    "false" => tokens.push(Token::False),
                    _ => tokens.push(Token::Ident(text)),
                }
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '%' => {
                chars.next();
                tokens.push(Token::Percent);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::EqEq);
                } else {
                    return Err(ExprError::Parse("unexpected '='; did you mean '=='?".to_string()));
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::NotEq);
                } else {
                    tokens.push(Token::Bang);
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '&' => {
                chars.next();
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push(Token::AndAnd);
                } else {
                    return Err(ExprError::Parse("unexpected '&'; did you mean '&&'?".to_string()));
                }
            }
            '|' => {
                chars.next();
                if chars.peek() == Some(&'|') {
                    chars.next();
                    tokens.push(Token::OrOr);
                } else {
                    return Err(ExprError::Parse("unexpected '|'; did you mean '||'?".to_string()));
                }
            }
            other => {
                return Err(ExprError::Parse(format!("unexpected character '{}'", other)));
            }
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum UnaryOp {
    Neg,
    Not,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(ExprError::Parse(format!(
                "expected {:?}, found {:?}",
                token,
                self.peek()
            )))
        }
    }

    fn expect_end(&self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(ExprError::Parse(format!(
                "unexpected trailing input at {:?}",
                token
            ))),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_comparison()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let lhs = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::EqEq) => BinaryOp::Eq,
            Some(Token::NotEq) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_additive()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat(&Token::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand)));
        }
        if self.eat(&Token::Bang) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Integer(i)) => Ok(Expr::Literal(Value::Integer(i))),
            Some(Token::Float(f)) => Ok(Expr::Literal(Value::Float(f))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::LParen) => {
                let inner = self.parse_expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                self.expect(Token::LParen)?;
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.parse_expression()?);
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        self.expect(Token::Comma)?;
                    }
                }
                Ok(Expr::Call(name, args))
            }
            other => Err(ExprError::Parse(format!(
                "unexpected token {:?}",
                other
            ))),
        }
    }
}

fn eval(expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Unary(op, operand) => {
            let value = eval(operand)?;
            match op {
                UnaryOp::Neg => match value {
                    Value::Integer(i) => Ok(Value::Integer(-i)),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    other => Err(ExprError::Type(format!("cannot negate {:?}", other))),
                },
                UnaryOp::Not => match value {
                    Value::Bool(b) => Ok(Value::Bool(!b)),
                    other => Err(ExprError::Type(format!("cannot apply '!' to {:?}", other))),
                },
            }
        }
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs),
        Expr::Call(name, args) => eval_call(name, args),
    }
}

fn eval_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<Value> {
    // && and || short-circuit
    if matches!(op, BinaryOp::And | BinaryOp::Or) {
        let left = match eval(lhs)? {
            Value::Bool(b) => b,
            other => {
                return Err(ExprError::Type(format!(
                    "logical operand must be boolean, got {:?}",
                    other
                )))
            }
        };
        match (op, left) {
            (BinaryOp::And, false) => return Ok(Value::Bool(false)),
            (BinaryOp::Or, true) => return Ok(Value::Bool(true)),
            _ => {}
        }
        return match eval(rhs)? {
            Value::Bool(b) => Ok(Value::Bool(b)),
            other => Err(ExprError::Type(format!(
                "logical operand must be boolean, got {:?}",
                other
            ))),
        };
    }

    let left = eval(lhs)?;
    let right = eval(rhs)?;

    match op {
        BinaryOp::Add => {
            if left.is_string() || right.is_string() {
                return Ok(Value::String(format!("{}{}", left, right)));
            }
            arithmetic(op, &left, &right)
        }
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, &left, &right)
        }
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(&left, &right))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_eq(&left, &right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&left, &right)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == std::cmp::Ordering::Less,
                BinaryOp::Le => ordering != std::cmp::Ordering::Greater,
                BinaryOp::Gt => ordering == std::cmp::Ordering::Greater,
                BinaryOp::Ge => ordering != std::cmp::Ordering::Less,
                _ => unreachable!(),
            }))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!(),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    if let (Value::Integer(a), Value::Integer(b)) = (left, right) {
        return match op {
            BinaryOp::Add => Ok(Value::Integer(a + b)),
            BinaryOp::Sub => Ok(Value::Integer(a - b)),
            BinaryOp::Mul => Ok(Value::Integer(a * b)),
            BinaryOp::Div => {
                if *b == 0 {
                    Err(ExprError::DivisionByZero)
                } else if a % b == 0 {
                    Ok(Value::Integer(a / b))
                } else {
                    Ok(Value::Float(*a as f64 / *b as f64))
                }
            }
            BinaryOp::Rem => {
                if *b == 0 {
                    Err(ExprError::DivisionByZero)
                } else {
                    Ok(Value::Integer(a % b))
                }
            }
            _ => unreachable!(),
        };
    }

    let a = left.as_float().ok_or_else(|| {
        ExprError::Type(format!("arithmetic operand must be numeric, got {:?}", left))
    })?;
    let b = right.as_float().ok_or_else(|| {
        ExprError::Type(format!("arithmetic operand must be numeric, got {:?}", right))
    })?;

    match op {
        BinaryOp::Add => Ok(Value::Float(a + b)),
        BinaryOp::Sub => Ok(Value::Float(a - b)),
        BinaryOp::Mul => Ok(Value::Float(a * b)),
        BinaryOp::Div => {
            if b == 0.0 {
                Err(ExprError::DivisionByZero)
            } else {
                Ok(Value::Float(a / b))
            }
        }
        BinaryOp::Rem => {
            if b == 0.0 {
                Err(ExprError::DivisionByZero)
            } else {
                Ok(Value::Float(a % b))
            }
        }
        _ => unreachable!(),
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    if let (Some(a), Some(b)) = (left.as_float(), right.as_float()) {
        return a == b;
    }
    left == right
}

fn compare(left: &Value, right: &Value) -> Result<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (left.as_float(), right.as_float()) {
        return a.partial_cmp(&b).ok_or_else(|| {
            ExprError::Type("cannot order NaN values".to_string())
        });
    }
    if let (Value::String(a), Value::String(b)) = (left, right) {
        return Ok(a.cmp(b));
    }
    Err(ExprError::Type(format!(
        "cannot order {:?} and {:?}",
        left, right
    )))
}

fn eval_call(name: &str, args: &[Expr]) -> Result<Value> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(eval(arg)?);
    }

    let require_number = |value: &Value| -> Result<f64> {
        value.as_float().ok_or_else(|| {
            ExprError::Type(format!("{}() requires a numeric argument, got {:?}", name, value))
        })
    };
    let require_string = |value: &Value| -> Result<String> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                ExprError::Type(format!("{}() requires a string argument, got {:?}", name, value))
            })
    };
    let require_arity = |n: usize| -> Result<()> {
        if values.len() == n {
            Ok(())
        } else {
            Err(ExprError::Type(format!(
                "{}() takes {} argument(s), got {}",
                name,
                n,
                values.len()
            )))
        }
    };

    match name {
        "abs" => {
            require_arity(1)?;
            match &values[0] {
                Value::Integer(i) => Ok(Value::Integer(i.abs())),
                other => Ok(Value::Float(require_number(other)?.abs())),
            }
        }
        "min" | "max" => {
            if values.is_empty() {
                return Err(ExprError::Type(format!("{}() takes at least one argument", name)));
            }
            let mut best = require_number(&values[0])?;
            let mut best_value = values[0].clone();
            for value in &values[1..] {
                let n = require_number(value)?;
                let better = if name == "min" { n < best } else { n > best };
                if better {
                    best = n;
                    best_value = value.clone();
                }
            }
            Ok(best_value)
        }
        "round" => {
            require_arity(1)?;
            Ok(Value::Integer(require_number(&values[0])?.round() as i64))
        }
        "floor" => {
            require_arity(1)?;
            Ok(Value::Integer(require_number(&values[0])?.floor() as i64))
        }
        "ceil" => {
            require_arity(1)?;
            Ok(Value::Integer(require_number(&values[0])?.ceil() as i64))
        }
        "len" => {
            require_arity(1)?;
            match &values[0] {
                Value::String(s) => Ok(Value::Integer(s.chars().count() as i64)),
                Value::List(l) => Ok(Value::Integer(l.len() as i64)),
                other => Err(ExprError::Type(format!(
                    "len() requires a string or list, got {:?}",
                    other
                ))),
            }
        }
        "upper" => {
            require_arity(1)?;
            Ok(Value::String(require_string(&values[0])?.to_uppercase()))
        }
        "lower" => {
            require_arity(1)?;
            Ok(Value::String(require_string(&values[0])?.to_lowercase()))
        }
        "trim" => {
            require_arity(1)?;
            Ok(Value::String(require_string(&values[0])?.trim().to_string()))
        }
        other => Err(ExprError::UnknownFunction(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic() {
        assert_eq!(evaluate("1 + 2 * 3").unwrap(), Value::Integer(7));
        assert_eq!(evaluate("(1 + 2) * 3").unwrap(), Value::Integer(9));
        assert_eq!(evaluate("10 / 4").unwrap(), Value::Float(2.5));
        assert_eq!(evaluate("10 / 5").unwrap(), Value::Integer(2));
        assert_eq!(evaluate("10 % 3").unwrap(), Value::Integer(1));
        assert_eq!(evaluate("-4 + 1").unwrap(), Value::Integer(-3));
        assert_eq!(evaluate("1.5 + 1").unwrap(), Value::Float(2.5));
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(evaluate("1 / 0"), Err(ExprError::DivisionByZero));
        assert_eq!(evaluate("1 % 0"), Err(ExprError::DivisionByZero));
    }

    #[test]
    fn test_strings() {
        assert_eq!(evaluate("'a' + 'b'").unwrap(), Value::from("ab"));
        assert_eq!(evaluate("'v' + 42").unwrap(), Value::from("v42"));
        assert_eq!(evaluate("upper('on')").unwrap(), Value::from("ON"));
        assert_eq!(evaluate("trim('  x ')").unwrap(), Value::from("x"));
        assert_eq!(evaluate("len('abc')").unwrap(), Value::Integer(3));
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(evaluate_bool("1 < 2").unwrap(), true);
        assert_eq!(evaluate_bool("2 <= 2").unwrap(), true);
        assert_eq!(evaluate_bool("2 == 2.0").unwrap(), true);
        assert_eq!(evaluate_bool("'a' < 'b'").unwrap(), true);
        assert_eq!(evaluate_bool("'on' == 'on'").unwrap(), true);
        assert_eq!(evaluate_bool("true && 1 > 2").unwrap(), false);
        assert_eq!(evaluate_bool("false || !false").unwrap(), true);
    }

    #[test]
    fn test_short_circuit() {
        // rhs would divide by zero if evaluated
        assert_eq!(evaluate_bool("false && 1 / 0 == 0").unwrap(), false);
        assert_eq!(evaluate_bool("true || 1 / 0 == 0").unwrap(), true);
    }

    #[test]
    fn test_functions() {
        assert_eq!(evaluate("abs(-3)").unwrap(), Value::Integer(3));
        assert_eq!(evaluate("min(4, 2, 9)").unwrap(), Value::Integer(2));
        assert_eq!(evaluate("max(4, 2, 9)").unwrap(), Value::Integer(9));
        assert_eq!(evaluate("round(2.6)").unwrap(), Value::Integer(3));
        assert_eq!(evaluate("floor(2.6)").unwrap(), Value::Integer(2));
        assert_eq!(evaluate("ceil(2.1)").unwrap(), Value::Integer(3));
    }

    #[test]
    fn test_rejects_outside_grammar() {
        assert!(matches!(
            evaluate("system('rm')"),
            Err(ExprError::UnknownFunction(_))
        ));
        assert!(matches!(evaluate("import os"), Err(ExprError::Parse(_))));
        assert!(matches!(evaluate("1 +"), Err(ExprError::Parse(_))));
        assert!(matches!(evaluate("a.b"), Err(ExprError::Parse(_))));
        assert!(matches!(evaluate("'open"), Err(ExprError::Parse(_))));
    }

    #[test]
    fn test_numeric_helper() {
        assert_eq!(evaluate_number("2 + 1").unwrap(), 3.0);
        assert!(evaluate_number("'text'").is_err());
    }
}
