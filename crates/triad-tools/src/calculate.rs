//! calculate tool: safe arithmetic evaluation.
//!
//! Only digits, `+ - * / ( ) .` and whitespace are accepted. Anything else
//! rejects the whole expression before evaluation. `**` is exponentiation
//! and binds tighter than unary minus on its left (`-2 ** 2 == -4`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::{ToolError, TypedTool};

const NOT_ARITHMETIC: &str = "Only basic arithmetic is allowed";
const EVAL_FAILED: &str = "Could not evaluate expression";

/// Nesting limit for parentheses and sign chains.
const MAX_DEPTH: usize = 256;

/// Largest integer an f64 represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

pub struct CalculateTool;

#[derive(Debug, Deserialize)]
pub struct CalculateArgs {
    pub expression: String,
}

#[derive(Debug, Serialize)]
pub struct CalculateOutput {
    pub expression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub computed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CalculateOutput {
    fn failed(expression: String, error: &str) -> Self {
        Self {
            expression,
            result: None,
            computed: false,
            error: Some(error.to_string()),
        }
    }
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '+' | '-' | '*' | '/' | '(' | ')' | '.') || c.is_whitespace()
}

/// Integral results become JSON integers, everything else a float.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        json!(n as i64)
    } else {
        json!(n)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Pow,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Option<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            _ if c.is_whitespace() => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Pow);
                i += 2;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
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
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                // "." alone or "1.2.3" fail here.
                tokens.push(Token::Num(literal.parse().ok()?));
            }
            _ => return None,
        }
    }
    Some(tokens)
}

/// Recursive-descent evaluator.
///
/// ```text
/// expr  := term (('+' | '-') term)*
/// term  := unary (('*' | '/') unary)*
/// unary := ('+' | '-') unary | power
/// power := atom ('**' unary)?
/// atom  := number | '(' expr ')'
/// ```
///
/// `unary` and `atom` count towards [`MAX_DEPTH`]; deeper input fails.
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.peek();
        self.pos += 1;
        t
    }

    fn nested(&mut self, f: impl FnOnce(&mut Self) -> Option<f64>) -> Option<f64> {
        if self.depth >= MAX_DEPTH {
            return None;
        }
        self.depth += 1;
        let value = f(self);
        self.depth -= 1;
        value
    }

    fn expr(&mut self) -> Option<f64> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    value += self.term()?;
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => return Some(value),
            }
        }
    }

    fn term(&mut self) -> Option<f64> {
        let mut value = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.pos += 1;
                    value *= self.unary()?;
                }
                Some(Token::Slash) => {
                    self.pos += 1;
                    value /= self.unary()?;
                }
                _ => return Some(value),
            }
        }
    }

    fn unary(&mut self) -> Option<f64> {
        self.nested(|p| match p.peek() {
            Some(Token::Plus) => {
                p.pos += 1;
                p.unary()
            }
            Some(Token::Minus) => {
                p.pos += 1;
                p.unary().map(|v| -v)
            }
            _ => p.power(),
        })
    }

    fn power(&mut self) -> Option<f64> {
        let base = self.atom()?;
        if self.peek() == Some(Token::Pow) {
            self.pos += 1;
            let exponent = self.unary()?;
            return Some(base.powf(exponent));
        }
        Some(base)
    }

    fn atom(&mut self) -> Option<f64> {
        self.nested(|p| match p.bump()? {
            Token::Num(n) => Some(n),
            Token::LParen => {
                let value = p.expr()?;
                (p.bump()? == Token::RParen).then_some(value)
            }
            _ => None,
        })
    }
}

/// Evaluate an arithmetic expression. `None` on syntax errors and on
/// non-finite results such as division by zero.
pub fn evaluate(expression: &str) -> Option<f64> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() || !value.is_finite() {
        return None;
    }
    Some(value)
}

#[async_trait]
impl TypedTool for CalculateTool {
    type Args = CalculateArgs;
    type Output = CalculateOutput;

    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "Evaluates a simple arithmetic expression (+, -, *, /)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The arithmetic expression to evaluate (e.g. \"2 + 3 * 4\")"
                }
            },
            "required": ["expression"]
        })
    }

    async fn call(&self, args: CalculateArgs) -> Result<CalculateOutput, ToolError> {
        let expression = args.expression;
        info!(%expression, "Calculating");

        if !expression.chars().all(is_allowed) {
            return Ok(CalculateOutput::failed(expression, NOT_ARITHMETIC));
        }

        Ok(match evaluate(&expression) {
            Some(n) => CalculateOutput {
                expression,
                result: Some(number_value(n)),
                computed: true,
                error: None,
            },
            None => CalculateOutput::failed(expression, EVAL_FAILED),
        })
    }
}
