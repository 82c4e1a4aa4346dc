//! Error types for tree operations.
//!
//! Every wrapping variant keeps its cause reachable through
//! [`std::error::Error::source`], so the outermost consumer can walk the
//! chain down to the root cause. Helper layers add context with
//! [`TreeError::context`] rather than replacing the error.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::value::Value;

/// Result type for tree operations.
pub type TreeResult<T> = Result<T, TreeError>;

/// Errors raised by trees, the expression language, and the watcher.
#[derive(Debug, Error)]
pub enum TreeError {
    /// `get` was called with the default-value marker on a tree that has no
    /// default value.
    #[error("{tree}: cannot get a null or undefined key")]
    NullKey { tree: &'static str },

    /// A strict traversal reached an absent value with keys remaining.
    #[error(transparent)]
    Traverse(#[from] TraverseError),

    /// A file-system operation failed for a reason other than "not found".
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A network request failed.
    #[error("fetch failed for {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// A URL could not be formed from a base and a key.
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Loading a file through its loader failed.
    #[error("failed to load {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: Box<TreeError>,
    },

    /// Malformed expression, key, or template source.
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    /// A write was attempted on a read-only tree.
    #[error("{tree} does not support set")]
    NotMutable { tree: &'static str },

    /// The tree's owning handle is gone; only reachable while it is dropping.
    #[error("{tree} is no longer alive")]
    Detached { tree: &'static str },

    /// Runtime failure inside the evaluator or a builtin.
    #[error("evaluation error: {0}")]
    Eval(String),

    /// A cause with context prepended by an enclosing layer.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<TreeError>,
    },

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TreeError {
    /// Wrap this error with a context message, keeping it as the source.
    pub fn context(self, context: impl Into<String>) -> TreeError {
        TreeError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Build an I/O error for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> TreeError {
        TreeError::Io {
            path: path.into(),
            source,
        }
    }

    /// The innermost error in the context chain.
    pub fn root_cause(&self) -> &TreeError {
        let mut current = self;
        while let TreeError::Context { source, .. } | TreeError::Load { source, .. } = current {
            current = source.as_ref();
        }
        current
    }
}

/// Extension for adding context to a [`TreeResult`].
pub trait ResultExt<T> {
    /// Prepend `context` to the error, if any.
    fn context(self, context: impl Into<String>) -> TreeResult<T>;

    /// Like [`ResultExt::context`], building the message only on failure.
    fn with_context<F, S>(self, f: F) -> TreeResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for TreeResult<T> {
    fn context(self, context: impl Into<String>) -> TreeResult<T> {
        self.map_err(|err| err.context(context))
    }

    fn with_context<F, S>(self, f: F) -> TreeResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|err| err.context(f()))
    }
}

/// A strict traversal could not continue.
///
/// `position` is the index into `keys` of the first key that could not be
/// applied; `last_value` is the last defined value reached before the miss.
#[derive(Debug)]
pub struct TraverseError {
    pub keys: Vec<String>,
    pub position: usize,
    pub last_value: Option<Value>,
}

impl fmt::Display for TraverseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self.keys.join("/");
        match self.keys.get(self.position) {
            Some(key) => write!(
                f,
                "cannot traverse {path}: no value to apply key {key:?} to (position {})",
                self.position
            ),
            None => write!(f, "cannot traverse {path}"),
        }
    }
}

impl std::error::Error for TraverseError {}

/// A lexical or syntax error with a byte offset into the source text.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} at offset {offset} in {text:?}")]
pub struct SyntaxError {
    pub message: String,
    pub offset: usize,
    pub text: String,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, offset: usize, text: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            offset,
            text: text.into(),
        }
    }
}
