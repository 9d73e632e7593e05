//! Small precedence parser for metric expressions such as
//! `booking_value * 0.05` or `(bookings - cancellations) / bookings`.
//!
//! Identifiers are measure references. Calls to scalar functions are kept
//! as-is; aggregate functions are rejected since measures are already
//! aggregated when a metric is evaluated.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl ArithOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Subtract => "-",
            ArithOp::Multiply => "*",
            ArithOp::Divide => "/",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            ArithOp::Add | ArithOp::Subtract => 1,
            ArithOp::Multiply | ArithOp::Divide => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricExpr {
    MeasureRef(String),
    /// Numeric literal, kept verbatim so `0.05` renders as written.
    Number(String),
    Neg(Box<MetricExpr>),
    Binary {
        op: ArithOp,
        left: Box<MetricExpr>,
        right: Box<MetricExpr>,
    },
    Func {
        name: String,
        args: Vec<MetricExpr>,
    },
}

const AGGREGATE_FUNCTIONS: &[&str] = &[
    "sum",
    "count",
    "min",
    "max",
    "avg",
    "average",
    "median",
    "stddev",
    "variance",
];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(String),
    Op(ArithOp),
    LParen,
    RParen,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) | Token::Number(s) => f.write_str(s),
            Token::Op(op) => f.write_str(op.symbol()),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::Comma => f.write_str(","),
        }
    }
}

/// Parse a metric expression. The error is a human-readable reason.
pub fn parse_metric_expr(input: &str) -> Result<MetricExpr, String> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err("expression is empty".to_string());
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_binary(0)?;
    match parser.peek() {
        None => Ok(expr),
        Some(tok) => Err(format!("unexpected token '{tok}'")),
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '+' => {
                tokens.push(Token::Op(ArithOp::Add));
                i += 1;
            }
            '-' => {
                tokens.push(Token::Op(ArithOp::Subtract));
                i += 1;
            }
            '*' => {
                tokens.push(Token::Op(ArithOp::Multiply));
                i += 1;
            }
            '/' => {
                tokens.push(Token::Op(ArithOp::Divide));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                if text.parse::<f64>().is_err() {
                    return Err(format!("invalid number '{text}'"));
                }
                tokens.push(Token::Number(text));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.next() {
            Some(tok) if tok == expected => Ok(()),
            Some(tok) => Err(format!("expected '{expected}', found '{tok}'")),
            None => Err(format!("expected '{expected}', found end of expression")),
        }
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<MetricExpr, String> {
        let mut left = self.parse_unary()?;
        while let Some(Token::Op(op)) = self.peek().cloned() {
            if op.precedence() <= min_prec {
                break;
            }
            self.pos += 1;
            let right = self.parse_binary(op.precedence())?;
            left = MetricExpr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<MetricExpr, String> {
        if let Some(Token::Op(ArithOp::Subtract)) = self.peek() {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(MetricExpr::Neg(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<MetricExpr, String> {
        match self.next() {
            Some(Token::Number(n)) => Ok(MetricExpr::Number(n)),
            Some(Token::LParen) => {
                let inner = self.parse_binary(0)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.peek() != Some(&Token::LParen) {
                    return Ok(MetricExpr::MeasureRef(name));
                }
                if AGGREGATE_FUNCTIONS.contains(&name.to_ascii_lowercase().as_str()) {
                    return Err(format!(
                        "aggregate function '{name}' is not allowed; measures are already aggregated"
                    ));
                }
                self.pos += 1;
                let mut args = Vec::new();
                if self.peek() == Some(&Token::RParen) {
                    self.pos += 1;
                } else {
                    loop {
                        args.push(self.parse_binary(0)?);
                        match self.next() {
                            Some(Token::Comma) => continue,
                            Some(Token::RParen) => break,
                            Some(tok) => return Err(format!("unexpected token '{tok}'")),
                            None => return Err("unclosed function call".to_string()),
                        }
                    }
                }
                Ok(MetricExpr::Func { name, args })
            }
            Some(tok) => Err(format!("unexpected token '{tok}'")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}
