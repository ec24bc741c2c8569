//! The fixed function library available in template pipelines.
//!
//! Functions never fail: integer division and modulo by zero yield 0,
//! arithmetic saturates, and out-of-range indexing yields the empty string.
//! In a pipeline the piped value is passed as the last argument, so
//! `{{ .X | default "y" }}` calls `default "y" .X`.

use std::cmp::Ordering;

use super::value::Value;

/// A library function, resolved when the template is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// `lower S`
    Lower,
    /// `upper S`
    Upper,
    /// `trim S`
    Trim,
    /// `contains S SUBSTR`
    Contains,
    /// `replace S OLD NEW`
    Replace,
    /// `split S SEP`
    Split,
    /// `join LIST SEP` or `join SEP LIST`
    Join,
    /// `add A B`
    Add,
    /// `sub A B`
    Sub,
    /// `mul A B`
    Mul,
    /// `div A B`
    Div,
    /// `mod A B`
    Mod,
    /// `eq A B`
    Eq,
    /// `ne A B`
    Ne,
    /// `lt A B`
    Lt,
    /// `le A B`
    Le,
    /// `gt A B`
    Gt,
    /// `ge A B`
    Ge,
    /// `and A B...`
    And,
    /// `or A B...`
    Or,
    /// `not A`
    Not,
    /// `default FALLBACK VALUE`
    Default,
    /// `index LIST N` or `index N LIST`
    Index,
    /// `len X`
    Len,
}

impl Function {
    const ALL: [Self; 24] = [
        Self::Lower,
        Self::Upper,
        Self::Trim,
        Self::Contains,
        Self::Replace,
        Self::Split,
        Self::Join,
        Self::Add,
        Self::Sub,
        Self::Mul,
        Self::Div,
        Self::Mod,
        Self::Eq,
        Self::Ne,
        Self::Lt,
        Self::Le,
        Self::Gt,
        Self::Ge,
        Self::And,
        Self::Or,
        Self::Not,
        Self::Default,
        Self::Index,
        Self::Len,
    ];

    /// Name used in templates.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Lower => "lower",
            Self::Upper => "upper",
            Self::Trim => "trim",
            Self::Contains => "contains",
            Self::Replace => "replace",
            Self::Split => "split",
            Self::Join => "join",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Mod => "mod",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "not",
            Self::Default => "default",
            Self::Index => "index",
            Self::Len => "len",
        }
    }

    /// Resolves a function name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }

    /// Accepted argument counts, inclusive.
    #[must_use]
    pub const fn arity(self) -> (usize, usize) {
        match self {
            Self::Lower | Self::Upper | Self::Trim | Self::Not | Self::Len => (1, 1),
            Self::Replace => (3, 3),
            Self::And | Self::Or => (1, usize::MAX),
            _ => (2, 2),
        }
    }

    /// Applies the function. Argument counts were checked at parse time;
    /// missing arguments read as the empty string.
    #[must_use]
    pub fn call(self, args: &[Value]) -> Value {
        let empty = Value::empty();
        let arg = |i: usize| args.get(i).unwrap_or(&empty);

        match self {
            Self::Lower => Value::Str(arg(0).text().to_lowercase()),
            Self::Upper => Value::Str(arg(0).text().to_uppercase()),
            Self::Trim => Value::Str(arg(0).text().trim().to_string()),
            Self::Contains => Value::Bool(contains(arg(0), &arg(1).text())),
            Self::Replace => Value::Str(arg(0).text().replace(&arg(1).text(), &arg(2).text())),
            Self::Split => Value::List(split(&arg(0).text(), &arg(1).text())),
            Self::Join => Value::Str(join(arg(0), arg(1))),
            Self::Add => Value::Int(arg(0).as_int().saturating_add(arg(1).as_int())),
            Self::Sub => Value::Int(arg(0).as_int().saturating_sub(arg(1).as_int())),
            Self::Mul => Value::Int(arg(0).as_int().saturating_mul(arg(1).as_int())),
            Self::Div => Value::Int(divide(arg(0).as_int(), arg(1).as_int())),
            Self::Mod => Value::Int(arg(0).as_int().checked_rem(arg(1).as_int()).unwrap_or(0)),
            Self::Eq => Value::Bool(equals(arg(0), arg(1))),
            Self::Ne => Value::Bool(!equals(arg(0), arg(1))),
            Self::Lt => Value::Bool(compare(arg(0), arg(1)) == Ordering::Less),
            Self::Le => Value::Bool(compare(arg(0), arg(1)) != Ordering::Greater),
            Self::Gt => Value::Bool(compare(arg(0), arg(1)) == Ordering::Greater),
            Self::Ge => Value::Bool(compare(arg(0), arg(1)) != Ordering::Less),
            Self::And => Value::Bool(args.iter().all(Value::is_truthy)),
            Self::Or => Value::Bool(args.iter().any(Value::is_truthy)),
            Self::Not => Value::Bool(!arg(0).is_truthy()),
            Self::Default => {
                if arg(1).is_empty() {
                    arg(0).clone()
                } else {
                    arg(1).clone()
                }
            }
            Self::Index => Value::Str(index(arg(0), arg(1))),
            Self::Len => Value::Int(length(arg(0))),
        }
    }
}

fn contains(haystack: &Value, needle: &str) -> bool {
    match haystack {
        Value::List(items) => items.iter().any(|item| item == needle),
        other => other.text().contains(needle),
    }
}

/// Splits on `sep`; the empty string splits into no elements.
fn split(text: &str, sep: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if sep.is_empty() {
        return text.chars().map(String::from).collect();
    }
    text.split(sep).map(str::to_string).collect()
}

fn join(first: &Value, second: &Value) -> String {
    match (first, second) {
        (Value::List(items), sep) | (sep, Value::List(items)) => items.join(&sep.text()),
        (single, _) => single.text(),
    }
}

fn divide(dividend: i64, divisor: i64) -> i64 {
    if divisor == 0 {
        0
    } else {
        dividend.saturating_div(divisor)
    }
}

fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::List(a), Value::List(b)) => a == b,
        (Value::Int(a), other) | (other, Value::Int(a)) => other.try_int() == Some(*a),
        _ => left.text() == right.text(),
    }
}

/// Numeric when both sides are numeric, lexicographic otherwise.
fn compare(left: &Value, right: &Value) -> Ordering {
    match (left.try_int(), right.try_int()) {
        (Some(a), Some(b)) if !matches!((left, right), (Value::List(_), _) | (_, Value::List(_))) => {
            a.cmp(&b)
        }
        _ => left.text().cmp(&right.text()),
    }
}

fn index(first: &Value, second: &Value) -> String {
    let (items, position) = match (first, second) {
        (Value::List(items), position) | (position, Value::List(items)) => (items, position),
        _ => return String::new(),
    };
    position
        .try_int()
        .and_then(|i| usize::try_from(i).ok())
        .and_then(|i| items.get(i).cloned())
        .unwrap_or_default()
}

fn length(value: &Value) -> i64 {
    let len = match value {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.len(),
        Value::Int(_) | Value::Bool(_) => 0,
    };
    i64::try_from(len).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Value {
        Value::List(items.iter().map(|s| (*s).to_string()).collect())
    }

    #[test]
    fn test_division_by_zero_is_zero() {
        assert_eq!(Function::Div.call(&[Value::Int(7), Value::Int(0)]), Value::Int(0));
        assert_eq!(Function::Mod.call(&[Value::Int(7), Value::Int(0)]), Value::Int(0));
        assert_eq!(Function::Div.call(&[Value::Int(7), Value::Int(2)]), Value::Int(3));
        assert_eq!(
            Function::Div.call(&[Value::Int(i64::MIN), Value::Int(-1)]),
            Value::Int(i64::MAX)
        );
    }

    #[test]
    fn test_index_out_of_range_is_empty() {
        let hosts = list(&["a", "b"]);
        assert_eq!(Function::Index.call(&[hosts.clone(), Value::Int(1)]), Value::from("b"));
        assert_eq!(Function::Index.call(&[Value::Int(0), hosts.clone()]), Value::from("a"));
        assert_eq!(Function::Index.call(&[hosts.clone(), Value::Int(5)]), Value::empty());
        assert_eq!(Function::Index.call(&[hosts, Value::Int(-1)]), Value::empty());
        assert_eq!(Function::Index.call(&[Value::from("x"), Value::Int(0)]), Value::empty());
    }

    #[test]
    fn test_default_uses_fallback_for_empty() {
        assert_eq!(
            Function::Default.call(&[Value::from("fallback"), Value::empty()]),
            Value::from("fallback")
        );
        assert_eq!(
            Function::Default.call(&[Value::from("fallback"), Value::from("set")]),
            Value::from("set")
        );
        assert_eq!(
            Function::Default.call(&[Value::from("x"), Value::Int(0)]),
            Value::Int(0)
        );
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(Function::Upper.call(&[Value::from("abc")]), Value::from("ABC"));
        assert_eq!(Function::Trim.call(&[Value::from("  a ")]), Value::from("a"));
        assert_eq!(
            Function::Replace.call(&[Value::from("a.b.c"), Value::from("."), Value::from("-")]),
            Value::from("a-b-c")
        );
        assert_eq!(
            Function::Split.call(&[Value::from("a,b"), Value::from(",")]),
            list(&["a", "b"])
        );
        assert_eq!(Function::Split.call(&[Value::empty(), Value::from(",")]), list(&[]));
        assert_eq!(
            Function::Join.call(&[Value::from(", "), list(&["a", "b"])]),
            Value::from("a, b")
        );
        assert_eq!(
            Function::Contains.call(&[list(&["a", "bc"]), Value::from("b")]),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(Function::Eq.call(&[Value::Int(25), Value::from("25")]), Value::Bool(true));
        assert_eq!(Function::Lt.call(&[Value::from("9"), Value::from("10")]), Value::Bool(true));
        assert_eq!(Function::Lt.call(&[Value::from("b"), Value::from("a")]), Value::Bool(false));
        assert_eq!(
            Function::And.call(&[Value::Bool(true), Value::from("x")]),
            Value::Bool(true)
        );
        assert_eq!(Function::Or.call(&[Value::Int(0), Value::empty()]), Value::Bool(false));
    }

    #[test]
    fn test_names_round_trip() {
        for function in Function::ALL {
            assert_eq!(Function::from_name(function.name()), Some(function));
        }
        assert_eq!(Function::from_name("printf"), None);
    }
}
