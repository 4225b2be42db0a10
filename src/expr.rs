//! Expression sub-language: `{{ ... }}` bodies and tag arguments
//!
//! Grammar: `expr := (identifier-path | string-literal) ('|' filter-name)*`.
//! Conditions add the three forms `lhs`, `not lhs`, and `lhs op rhs`.
//! Expressions are parsed once at compile time and evaluated per render.

use chumsky::error::RichReason;
use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use logos::Logos;

use crate::context::Context;
use crate::env::Environment;
use crate::error::SyntaxError;
use crate::value::{self, ArithOp, Value};

/// Tokens of the expression sub-language.
///
/// A `Path` covers dotted lookups and bare literals alike (`user.name`,
/// `items.0`, `42`, `True`); which one it is gets decided when the target
/// is built. Keyword operators lose to longer path matches, so `index`
/// and `interval` stay ordinary identifiers.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum ExprToken {
    #[token("|")]
    Pipe,
    #[token("==")]
    Eq,
    #[token("!=")]
    Ne,
    #[token(">=")]
    Ge,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token("<")]
    Lt,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("//")]
    FloorDiv,
    #[token("/")]
    Slash,
    #[token("in")]
    In,
    #[token("and")]
    And,
    #[token("not")]
    Not,

    #[regex(r"[A-Za-z0-9_][A-Za-z0-9_.]*", |lex| lex.slice().to_string(), priority = 1)]
    Path(String),

    #[regex(r#""[^"]*"(\.[A-Za-z0-9_]+)*"#, |lex| lex.slice().to_string())]
    #[regex(r#"'[^']*'(\.[A-Za-z0-9_]+)*"#, |lex| lex.slice().to_string())]
    Str(String),
}

/// A parsed expression: resolution target plus filter pipe chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    raw: String,
    target: Target,
    filters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Target {
    /// A literal value (number, boolean, none)
    Literal(Value),
    /// A dotted lookup path; the first segment may still turn out to be a
    /// literal at eval time (`3.attr` resolves `3` as a number)
    Path(Vec<String>),
    /// A quoted string, optionally followed by `.attr` accesses
    Str { value: String, attrs: Vec<String> },
}

/// Condition of an `if`/`elif` tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `{% if x %}`
    Truthy(Expr),
    /// `{% if not x %}`
    Not(Expr),
    /// `{% if x op y %}`
    Binary { lhs: Expr, op: BinOp, rhs: Expr },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    In,
    And,
    Add,
    Sub,
    Mul,
    /// `/` and `//` are the same operator here; both floor-divide
    Div,
}

/// Parse an expression string, failing on any unparsed remainder.
pub fn parse_expr(input: &str) -> Result<Expr, SyntaxError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SyntaxError::new("empty expression"));
    }
    let tokens = lex(trimmed)?;
    let len = trimmed.len();
    let token_iter = tokens.into_iter().map(|(tok, span)| (tok, span.into()));
    let token_stream =
        Stream::from_iter(token_iter).map((len..len).into(), |(t, s): (_, _)| (t, s));
    match expr_core()
        .then_ignore(end())
        .parse(token_stream)
        .into_result()
    {
        Ok(mut expr) => {
            expr.raw = trimmed.to_string();
            Ok(expr)
        }
        Err(errors) => Err(rich_to_syntax(errors, trimmed)),
    }
}

/// Parse an `if`/`elif` condition string.
pub fn parse_condition(input: &str) -> Result<Condition, SyntaxError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SyntaxError::new("empty condition"));
    }
    let tokens = lex(trimmed)?;
    if tokens.len() == 3 {
        if let (
            ExprToken::Path(_) | ExprToken::Str(_),
            ExprToken::Path(word),
            ExprToken::Path(_) | ExprToken::Str(_),
        ) = (&tokens[0].0, &tokens[1].0, &tokens[2].0)
        {
            return Err(SyntaxError::new(format!(
                "unknown operator '{}' in condition '{}'",
                word, trimmed
            )));
        }
    }
    let len = trimmed.len();
    let token_iter = tokens.into_iter().map(|(tok, span)| (tok, span.into()));
    let token_stream =
        Stream::from_iter(token_iter).map((len..len).into(), |(t, s): (_, _)| (t, s));
    condition_core()
        .then_ignore(end())
        .parse(token_stream)
        .into_result()
        .map_err(|errors| rich_to_syntax(errors, trimmed))
}

/// Valid loop/filter/set identifier: letters, digits, underscore, not
/// starting with a digit.
pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn lex(input: &str) -> Result<Vec<(ExprToken, logos::Span)>, SyntaxError> {
    let mut tokens = Vec::new();
    for (token, span) in ExprToken::lexer(input).spanned() {
        match token {
            Ok(token) => tokens.push((token, span)),
            Err(()) => {
                return Err(SyntaxError::new(format!(
                    "could not parse '{}' from '{}'",
                    &input[span.start..],
                    input
                )))
            }
        }
    }
    Ok(tokens)
}

fn rich_to_syntax(errors: Vec<Rich<'_, ExprToken>>, input: &str) -> SyntaxError {
    let Some(error) = errors.into_iter().next() else {
        return SyntaxError::new(format!("could not parse '{}'", input));
    };
    if let RichReason::Custom(message) = error.reason() {
        return SyntaxError::new(message.to_string());
    }
    let start = error.span().into_range().start;
    let remainder = input.get(start..).unwrap_or("").trim();
    if remainder.is_empty() {
        SyntaxError::new(format!("unexpected end of expression in '{}'", input))
    } else {
        SyntaxError::new(format!(
            "could not parse '{}' from '{}'",
            remainder, input
        ))
    }
}

fn target_from_path(raw: &str) -> Target {
    // Whole-token literal first, so floats with dots survive.
    if let Some(value) = Value::parse_literal(raw) {
        return Target::Literal(value);
    }
    Target::Path(raw.split('.').map(str::to_string).collect())
}

fn target_from_str(raw: &str) -> Target {
    let quote = raw.chars().next().unwrap_or('"');
    let closing = raw[1..].find(quote).map(|i| i + 1).unwrap_or(0);
    let value = raw[1..closing].to_string();
    let attrs = raw[closing + 1..]
        .split('.')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    Target::Str { value, attrs }
}

fn expr_core<'a, I>() -> impl Parser<'a, I, Expr, extra::Err<Rich<'a, ExprToken>>> + Clone
where
    I: ValueInput<'a, Token = ExprToken, Span = SimpleSpan>,
{
    let target = select! {
        ExprToken::Path(path) => target_from_path(&path),
        ExprToken::Str(raw) => target_from_str(&raw),
    };

    let filter_name = select! { ExprToken::Path(name) => name }.try_map(|name, span| {
        if is_identifier(&name) {
            Ok(name)
        } else {
            Err(Rich::custom(
                span,
                format!("filter name must be an identifier, not '{}'", name),
            ))
        }
    });

    target
        .then(
            just(ExprToken::Pipe)
                .ignore_then(filter_name)
                .repeated()
                .collect::<Vec<_>>(),
        )
        .map(|(target, filters)| Expr {
            raw: String::new(),
            target,
            filters,
        })
}

fn condition_core<'a, I>() -> impl Parser<'a, I, Condition, extra::Err<Rich<'a, ExprToken>>> + Clone
where
    I: ValueInput<'a, Token = ExprToken, Span = SimpleSpan>,
{
    let operator = select! {
        ExprToken::Eq => BinOp::Eq,
        ExprToken::Ne => BinOp::Ne,
        ExprToken::Ge => BinOp::Ge,
        ExprToken::Le => BinOp::Le,
        ExprToken::Gt => BinOp::Gt,
        ExprToken::Lt => BinOp::Lt,
        ExprToken::In => BinOp::In,
        ExprToken::And => BinOp::And,
        ExprToken::Plus => BinOp::Add,
        ExprToken::Minus => BinOp::Sub,
        ExprToken::Star => BinOp::Mul,
        ExprToken::Slash => BinOp::Div,
        ExprToken::FloorDiv => BinOp::Div,
    };

    choice((
        just(ExprToken::Not)
            .ignore_then(expr_core())
            .map(Condition::Not),
        expr_core()
            .then(operator.then(expr_core()).or_not())
            .map(|(lhs, tail)| match tail {
                Some((op, rhs)) => Condition::Binary { lhs, op, rhs },
                None => Condition::Truthy(lhs),
            }),
    ))
}

impl Expr {
    /// The original expression text, for error messages.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    /// Evaluate against a context. Missing names, failed attribute probes,
    /// and unresolvable paths all yield [`Value::None`] rather than errors.
    pub fn eval(&self, ctx: &Context, env: &Environment) -> Value {
        let resolved = match &self.target {
            Target::Literal(value) => value.clone(),
            Target::Str { value, attrs } => traverse(Value::String(value.clone()), attrs),
            Target::Path(segments) => {
                let Some(first) = segments.first() else {
                    return Value::None;
                };
                let root = match Value::parse_literal(first) {
                    Some(value) => value,
                    None => ctx.get(first).cloned().unwrap_or(Value::None),
                };
                let root = invoke_if_callable(root);
                if root.is_none() {
                    Value::None
                } else {
                    traverse(root, &segments[1..])
                }
            }
        };
        if resolved.is_none() {
            // No value short-circuits the whole expression; filters do not
            // run on it.
            return Value::None;
        }
        let mut value = resolved;
        for name in &self.filters {
            match env.filter(name) {
                Some(filter) => value = filter(value),
                None => log::debug!("unknown filter '{}' skipped", name),
            }
        }
        value
    }

    /// Evaluate and stringify; no value renders as the empty string.
    pub fn render(&self, ctx: &Context, env: &Environment) -> String {
        self.eval(ctx, env).to_string()
    }
}

impl Condition {
    pub fn eval(&self, ctx: &Context, env: &Environment) -> bool {
        match self {
            Condition::Truthy(expr) => expr.eval(ctx, env).is_truthy(),
            Condition::Not(expr) => !expr.eval(ctx, env).is_truthy(),
            Condition::Binary { lhs, op, rhs } => {
                let left = lhs.eval(ctx, env);
                let right = rhs.eval(ctx, env);
                match op {
                    BinOp::Eq => left == right,
                    BinOp::Ne => left != right,
                    BinOp::Gt => cmp_is(&left, &right, std::cmp::Ordering::is_gt),
                    BinOp::Lt => cmp_is(&left, &right, std::cmp::Ordering::is_lt),
                    BinOp::Ge => cmp_is(&left, &right, std::cmp::Ordering::is_ge),
                    BinOp::Le => cmp_is(&left, &right, std::cmp::Ordering::is_le),
                    BinOp::In => value::contains(&right, &left),
                    BinOp::And => left.is_truthy() && right.is_truthy(),
                    BinOp::Add => arith_truthy(ArithOp::Add, &left, &right),
                    BinOp::Sub => arith_truthy(ArithOp::Sub, &left, &right),
                    BinOp::Mul => arith_truthy(ArithOp::Mul, &left, &right),
                    BinOp::Div => arith_truthy(ArithOp::FloorDiv, &left, &right),
                }
            }
        }
    }
}

fn cmp_is(a: &Value, b: &Value, check: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    value::compare(a, b).map(check).unwrap_or(false)
}

fn arith_truthy(op: ArithOp, a: &Value, b: &Value) -> bool {
    value::arith(op, a, b)
        .map(|v| v.is_truthy())
        .unwrap_or(false)
}

/// Walk dotted segments: map key, then callable invocation, then integer
/// index, in that fixed order. Any failure yields no value.
fn traverse(mut value: Value, segments: &[String]) -> Value {
    for segment in segments {
        if segment.is_empty() {
            continue;
        }
        value = match lookup_segment(&value, segment) {
            Some(next) => invoke_if_callable(next),
            None => return Value::None,
        };
    }
    value
}

fn lookup_segment(value: &Value, segment: &str) -> Option<Value> {
    match value {
        Value::Map(map) => map.get(segment).cloned(),
        Value::List(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(|index| items.get(index).cloned()),
        Value::String(s) => segment
            .parse::<usize>()
            .ok()
            .and_then(|index| s.chars().nth(index))
            .map(|c| Value::String(c.to_string())),
        _ => None,
    }
}

fn invoke_if_callable(value: Value) -> Value {
    match value {
        Value::Callable(callable) => callable.invoke(),
        other => other,
    }
}
