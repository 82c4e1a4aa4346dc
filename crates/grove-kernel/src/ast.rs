//! AST for the expression language.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::value::Value;

/// A compiled expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Code {
    /// Look a name up in the scope: `name`, `a/`.
    Scope(String),
    /// A constant: `"text"`, `42`.
    Literal(Literal),
    /// Deferred evaluation; the inner code runs on first access.
    Getter(Arc<Code>),
    /// Stringify every part and join them: `` `Hello, {{ name }}!` ``.
    Concat(Vec<Code>),
    /// Apply a callee to arguments: `fn(a, b)`, `a/b/c`.
    Call { callee: Box<Code>, args: Vec<Code> },
    /// Feed each step's result to the next: `a -> f -> g`.
    Pipeline(Vec<Code>),
    /// A function of `.`/`@value` and `@key`: `=expr`.
    Lambda(Arc<Code>),
    /// The key formed from a bound variable plus a suffix: `{name}.md`.
    Variable { name: String, suffix: Option<String> },
    /// An inline tree: `{ title: "Home", body = render(title) }`.
    Object(Vec<(String, Code)>),
    /// An inline sequence: `[a, b, c]`.
    Array(Vec<Code>),
}

impl Code {
    /// Literal string code.
    pub fn string(s: impl Into<String>) -> Code {
        Code::Literal(Literal::String(s.into()))
    }

    /// Visit this node and every node below it, depth first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Code)) {
        visit(self);
        match self {
            Code::Getter(inner) | Code::Lambda(inner) => inner.walk(visit),
            Code::Concat(parts) | Code::Pipeline(parts) | Code::Array(parts) => {
                for part in parts {
                    part.walk(visit);
                }
            }
            Code::Call { callee, args } => {
                callee.walk(visit);
                for arg in args {
                    arg.walk(visit);
                }
            }
            Code::Object(entries) => {
                for (_, code) in entries {
                    code.walk(visit);
                }
            }
            Code::Scope(_) | Code::Literal(_) | Code::Variable { .. } => {}
        }
    }

    /// A copy with every scope lookup of `from` (as decided by `matches`)
    /// replaced with a lookup of `to`.
    pub fn replace_scope(&self, matches: &impl Fn(&str) -> bool, to: &str) -> Code {
        let replace = |code: &Code| code.replace_scope(matches, to);
        match self {
            Code::Scope(name) if matches(name) => Code::Scope(to.to_string()),
            Code::Getter(inner) => Code::Getter(Arc::new(replace(inner))),
            Code::Lambda(inner) => Code::Lambda(Arc::new(replace(inner))),
            Code::Concat(parts) => Code::Concat(parts.iter().map(replace).collect()),
            Code::Pipeline(steps) => Code::Pipeline(steps.iter().map(replace).collect()),
            Code::Array(items) => Code::Array(items.iter().map(replace).collect()),
            Code::Call { callee, args } => Code::Call {
                callee: Box::new(replace(callee)),
                args: args.iter().map(replace).collect(),
            },
            Code::Object(entries) => Code::Object(
                entries
                    .iter()
                    .map(|(key, code)| (key.clone(), replace(code)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Code::Scope(name) => write!(f, "{name}"),
            Code::Literal(literal) => write!(f, "{literal}"),
            Code::Getter(inner) => write!(f, "getter({inner})"),
            Code::Concat(parts) => {
                write!(f, "`")?;
                for part in parts {
                    match part {
                        Code::Literal(Literal::String(s)) => write!(f, "{s}")?,
                        other => write!(f, "{{{{ {other} }}}}")?,
                    }
                }
                write!(f, "`")
            }
            Code::Call { callee, args } => {
                write!(f, "{callee}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Code::Pipeline(steps) => {
                for (i, step) in steps.iter().enumerate() {
                    if i > 0 {
                        write!(f, " -> ")?;
                    }
                    write!(f, "{step}")?;
                }
                Ok(())
            }
            Code::Lambda(body) => write!(f, "={body}"),
            Code::Variable { name, suffix } => {
                write!(f, "{{{name}}}{}", suffix.as_deref().unwrap_or(""))
            }
            Code::Object(entries) => {
                write!(f, "{{ ")?;
                for (i, (key, code)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match code {
                        Code::Getter(inner) => write!(f, "{key} = {inner}")?,
                        other => write!(f, "{key}: {other}")?,
                    }
                }
                write!(f, " }}")
            }
            Code::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// A constant value in source.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Int(i64),
    Float(f64),
}

impl Literal {
    pub fn to_value(&self) -> Value {
        match self {
            Literal::String(s) => Value::String(s.clone()),
            Literal::Int(n) => Value::Int(*n),
            Literal::Float(x) => Value::Float(*x),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "{s:?}"),
            Literal::Int(n) => write!(f, "{n}"),
            Literal::Float(x) => write!(f, "{x}"),
        }
    }
}

/// The left-hand side of a key: a plain name or a placeholder pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// A fixed key.
    Literal(String),
    /// `{name}` with an optional literal suffix, as in `{name}.html`.
    Variable { name: String, suffix: Option<String> },
}

impl Pattern {
    /// The variable this pattern binds, if any.
    pub fn variable(&self) -> Option<&str> {
        match self {
            Pattern::Literal(_) => None,
            Pattern::Variable { name, .. } => Some(name),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Literal(name) => write!(f, "{name}"),
            Pattern::Variable { name, suffix } => {
                write!(f, "{{{name}}}{}", suffix.as_deref().unwrap_or(""))
            }
        }
    }
}

/// A key parsed as `pattern = expression` or as a bare pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySyntax {
    Assignment { pattern: Pattern, code: Code },
    Reference(Pattern),
}

/// A piece of a template document.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    /// Literal text, copied to the output as is.
    Text(String),
    /// A `{{ expression }}` span; `range` covers the braces in the source.
    Span { code: Code, range: Range<usize> },
}
