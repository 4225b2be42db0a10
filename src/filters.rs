//! Built-in filters
//!
//! Filters are unary `Value -> Value` functions applied through the `|`
//! pipe syntax. Every environment starts with this set; hosts add their
//! own with [`Environment::with_filter`](crate::Environment::with_filter).

use std::collections::HashMap;
use std::sync::Arc;

use crate::value::Value;

/// A registered filter callback.
pub type FilterFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// The default filter table installed into every new environment.
pub fn default_filters() -> HashMap<String, FilterFn> {
    let mut filters: HashMap<String, FilterFn> = HashMap::new();
    filters.insert("upper".into(), Arc::new(upper));
    filters.insert("lower".into(), Arc::new(lower));
    filters.insert("title".into(), Arc::new(title));
    filters.insert("trim".into(), Arc::new(trim));
    filters.insert("escape".into(), Arc::new(escape));
    filters.insert("length".into(), Arc::new(length));
    filters.insert("first".into(), Arc::new(first));
    filters.insert("last".into(), Arc::new(last));
    filters.insert("call".into(), Arc::new(call));
    filters
}

fn upper(value: Value) -> Value {
    Value::String(value.to_string().to_uppercase())
}

fn lower(value: Value) -> Value {
    Value::String(value.to_string().to_lowercase())
}

/// Capitalize the first letter of each whitespace-separated word.
fn title(value: Value) -> Value {
    let s = value.to_string();
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_whitespace() {
            at_word_start = true;
            out.push(c);
        } else if at_word_start {
            out.extend(c.to_uppercase());
            at_word_start = false;
        } else {
            out.extend(c.to_lowercase());
        }
    }
    Value::String(out)
}

fn trim(value: Value) -> Value {
    Value::String(value.to_string().trim().to_string())
}

/// HTML-escape `& < > " '`.
fn escape(value: Value) -> Value {
    let s = value.to_string();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    Value::String(out)
}

fn length(value: Value) -> Value {
    match value.len() {
        Some(n) => Value::Int(n as i64),
        None => Value::None,
    }
}

fn first(value: Value) -> Value {
    match value {
        Value::List(items) => items.into_iter().next().unwrap_or(Value::None),
        Value::String(s) => s
            .chars()
            .next()
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::None),
        _ => Value::None,
    }
}

fn last(value: Value) -> Value {
    match value {
        Value::List(items) => items.into_iter().last().unwrap_or(Value::None),
        Value::String(s) => s
            .chars()
            .last()
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::None),
        _ => Value::None,
    }
}

/// Invoke a callable value; anything else passes through unchanged.
fn call(value: Value) -> Value {
    match value {
        Value::Callable(callable) => callable.invoke(),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Callable;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_upper_lower() {
        assert_eq!(upper(Value::from("hi")), Value::from("HI"));
        assert_eq!(lower(Value::from("Hi")), Value::from("hi"));
    }

    #[test]
    fn test_upper_stringifies() {
        assert_eq!(upper(Value::Int(3)), Value::from("3"));
    }

    #[test]
    fn test_title() {
        assert_eq!(
            title(Value::from("hello template world")),
            Value::from("Hello Template World")
        );
    }

    #[test]
    fn test_escape() {
        assert_eq!(
            escape(Value::from("<a href=\"x\">&'</a>")),
            Value::from("&lt;a href=&quot;x&quot;&gt;&amp;&#x27;&lt;/a&gt;")
        );
    }

    #[test]
    fn test_length() {
        assert_eq!(length(Value::from(vec![1, 2, 3])), Value::Int(3));
        assert_eq!(length(Value::from("abcd")), Value::Int(4));
        assert_eq!(length(Value::Int(5)), Value::None);
    }

    #[test]
    fn test_first_last() {
        let items = Value::from(vec!["a", "b", "c"]);
        assert_eq!(first(items.clone()), Value::from("a"));
        assert_eq!(last(items), Value::from("c"));
        assert_eq!(first(Value::List(vec![])), Value::None);
    }

    #[test]
    fn test_call() {
        let callable = Value::Callable(Callable::new(|| Value::Int(9)));
        assert_eq!(call(callable), Value::Int(9));
        assert_eq!(call(Value::Int(1)), Value::Int(1));
    }
}
