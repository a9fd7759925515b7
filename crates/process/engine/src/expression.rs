//! Expression evaluation for guards, cardinalities and completion conditions
//!
//! The core never interprets expressions itself. It hands them to an
//! [`ExpressionEvaluator`] together with the variables visible from the
//! execution. Evaluation is a pure function of those variables.

use process_types::{ActivityId, ProcessError, ProcessResult, VariableMap, VariableValue};

/// Evaluates expressions against an execution's visible variables
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate an expression to a value
    fn evaluate(&self, expression: &str, variables: &VariableMap) -> ProcessResult<VariableValue>;

    /// Evaluate a boolean condition owned by an activity
    ///
    /// Anything other than a boolean result is a configuration fault.
    fn evaluate_condition(
        &self,
        activity: &ActivityId,
        expression: &str,
        variables: &VariableMap,
    ) -> ProcessResult<bool> {
        match self.evaluate(expression, variables)? {
            VariableValue::Bool(b) => Ok(b),
            _ => Err(ProcessError::NonBooleanCondition {
                activity: activity.clone(),
                expression: expression.to_string(),
            }),
        }
    }
}

/// Small built-in expression language
///
/// Supports literals (numbers, quoted strings, `true`, `false`, `null`,
/// JSON arrays), variable references with dotted paths, comparisons
/// (`== != > >= < <=`), `!`, `&&`, `||` and parentheses. An optional
/// `${...}` wrapper is accepted.
#[derive(Clone, Debug, Default)]
pub struct SimpleEvaluator;

impl SimpleEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionEvaluator for SimpleEvaluator {
    fn evaluate(&self, expression: &str, variables: &VariableMap) -> ProcessResult<VariableValue> {
        let source = strip_wrapper(expression);
        let tokens = tokenize(source).map_err(|reason| expression_error(expression, reason))?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            variables,
        };
        let value = parser
            .parse_or()
            .map_err(|reason| expression_error(expression, reason))?;
        if parser.pos != tokens.len() {
            return Err(expression_error(expression, "unexpected trailing input"));
        }
        Ok(value)
    }
}

fn expression_error(expression: &str, reason: impl Into<String>) -> ProcessError {
    ProcessError::Expression {
        expression: expression.to_string(),
        reason: reason.into(),
    }
}

fn strip_wrapper(expression: &str) -> &str {
    let trimmed = expression.trim();
    trimmed
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .unwrap_or(trimmed)
}

// ── Tokens ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Value(VariableValue),
    Ident(String),
    Op(&'static str),
    Not,
    And,
    Or,
    Open,
    Close,
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            '&' | '|' => {
                if chars.get(i + 1) != Some(&c) {
                    return Err(format!("expected '{c}{c}'"));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
                i += 2;
            }
            '=' | '!' | '>' | '<' => {
                let followed_by_eq = chars.get(i + 1) == Some(&'=');
                let token = match (c, followed_by_eq) {
                    ('=', true) => Token::Op("=="),
                    ('!', true) => Token::Op("!="),
                    ('>', true) => Token::Op(">="),
                    ('<', true) => Token::Op("<="),
                    ('>', false) => Token::Op(">"),
                    ('<', false) => Token::Op("<"),
                    ('!', false) => Token::Not,
                    _ => return Err("single '=' is not an operator".into()),
                };
                i += if followed_by_eq { 2 } else { 1 };
                tokens.push(token);
            }
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == c)
                    .ok_or("unterminated string literal")?;
                let text: String = chars[i + 1..i + 1 + end].iter().collect();
                tokens.push(Token::Value(VariableValue::String(text)));
                i += end + 2;
            }
            '[' => {
                let end = matching_bracket(&chars, i).ok_or("unterminated array literal")?;
                let text: String = chars[i..=end].iter().collect();
                let value: VariableValue = serde_json::from_str(&text)
                    .map_err(|e| format!("invalid array literal: {e}"))?;
                tokens.push(Token::Value(value));
                i = end + 1;
            }
            c if c.is_ascii_digit() || (c == '-' && next_is_digit(&chars, i)) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value: VariableValue = serde_json::from_str(&text)
                    .map_err(|_| format!("invalid number '{text}'"))?;
                tokens.push(Token::Value(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::Value(VariableValue::Bool(true)),
                    "false" => Token::Value(VariableValue::Bool(false)),
                    "null" => Token::Value(VariableValue::Null),
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }

    Ok(tokens)
}

fn next_is_digit(chars: &[char], i: usize) -> bool {
    chars.get(i + 1).is_some_and(|c| c.is_ascii_digit())
}

fn matching_bracket(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (offset, &c) in chars[open..].iter().enumerate() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') => quote = Some('"'),
            (None, '[') => depth += 1,
            (None, ']') => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

// ── Parser ───────────────────────────────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    variables: &'a VariableMap,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn parse_or(&mut self) -> Result<VariableValue, String> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = VariableValue::Bool(as_bool(&left)? || as_bool(&right)?);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<VariableValue, String> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = VariableValue::Bool(as_bool(&left)? && as_bool(&right)?);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<VariableValue, String> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            let value = self.parse_unary()?;
            return Ok(VariableValue::Bool(!as_bool(&value)?));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<VariableValue, String> {
        let left = self.parse_primary()?;
        let Some(Token::Op(op)) = self.peek().cloned() else {
            return Ok(left);
        };
        self.pos += 1;
        let right = self.parse_primary()?;
        compare(op, &left, &right).map(VariableValue::Bool)
    }

    fn parse_primary(&mut self) -> Result<VariableValue, String> {
        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| "unexpected end of expression".to_string())?;
        self.pos += 1;
        match token {
            Token::Value(value) => Ok(value),
            Token::Ident(name) => self.lookup(&name),
            Token::Open => {
                let value = self.parse_or()?;
                if self.peek() != Some(&Token::Close) {
                    return Err("missing ')'".into());
                }
                self.pos += 1;
                Ok(value)
            }
            other => Err(format!("unexpected token {other:?}")),
        }
    }

    fn lookup(&self, path: &str) -> Result<VariableValue, String> {
        let mut segments = path.split('.');
        let head = segments.next().unwrap_or_default();
        let mut value = self
            .variables
            .get(head)
            .ok_or_else(|| format!("unknown variable '{head}'"))?;
        for segment in segments {
            value = value
                .get(segment)
                .ok_or_else(|| format!("'{path}' has no field '{segment}'"))?;
        }
        Ok(value.clone())
    }
}

fn as_bool(value: &VariableValue) -> Result<bool, String> {
    value
        .as_bool()
        .ok_or_else(|| format!("{value} is not a boolean"))
}

fn compare(op: &str, left: &VariableValue, right: &VariableValue) -> Result<bool, String> {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return Ok(match op {
            "==" => l == r,
            "!=" => l != r,
            ">" => l > r,
            ">=" => l >= r,
            "<" => l < r,
            "<=" => l <= r,
            _ => return Err(format!("unknown operator '{op}'")),
        });
    }
    match op {
        "==" => Ok(left == right),
        "!=" => Ok(left != right),
        _ => match (left.as_str(), right.as_str()) {
            (Some(l), Some(r)) => Ok(match op {
                ">" => l > r,
                ">=" => l >= r,
                "<" => l < r,
                _ => l <= r,
            }),
            _ => Err(format!("cannot order {left} and {right}")),
        },
    }
}
