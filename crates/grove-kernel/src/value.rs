//! Values stored in and produced by trees.
//!
//! Absent is modelled as `Option::None` at every API boundary; `Value::Null`
//! is a present value that happens to be null.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::OnceCell;

use crate::ast::Code;
use crate::error::TreeResult;
use crate::interpreter;
use crate::tree::TreeRef;
use crate::tree::loaders::Loader;

/// A value held by a tree.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    /// A subtree.
    Tree(TreeRef),
    /// Something callable: a builtin, a lambda, a bound record method.
    Function(Function),
    /// A getter computed on first access and then remembered.
    Lazy(Thunk),
    /// File content waiting for its loader.
    Packed(Packed),
}

impl Value {
    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Tree(_) => "tree",
            Value::Function(_) => "function",
            Value::Lazy(_) => "getter",
            Value::Packed(_) => "packed",
        }
    }

    /// True if the value can be traversed with further keys.
    pub fn is_treelike(&self) -> bool {
        matches!(self, Value::Tree(_))
    }

    pub fn as_tree(&self) -> Option<&TreeRef> {
        match self {
            Value::Tree(tree) => Some(tree),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// JavaScript-like truthiness, used by `filter`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0 && !f.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Text for a terminal value, or `None` for trees and callables.
    ///
    /// Used when a value has to become a key or part of a string.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => Some(String::new()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(n) => Some(n.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::String(s) => Some(s.clone()),
            Value::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            Value::Packed(packed) => Some(packed.text()),
            Value::Tree(_) | Value::Function(_) | Value::Lazy(_) => None,
        }
    }

    /// Force getters until the value is no longer lazy.
    ///
    /// `scope` is used by getters that were stored without one.
    pub async fn resolve(self, scope: Option<TreeRef>) -> TreeResult<Option<Value>> {
        let mut current = self;
        loop {
            match current {
                Value::Lazy(thunk) => match thunk.force(scope.clone()).await? {
                    Some(next) => current = next,
                    None => return Ok(None),
                },
                other => return Ok(Some(other)),
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(n) => write!(f, "Int({n})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Value::Tree(tree) => write!(f, "Tree({})", tree.kind()),
            Value::Function(func) => write!(f, "Function({})", func.name()),
            Value::Lazy(thunk) => write!(f, "Lazy({})", thunk.code()),
            Value::Packed(packed) => write!(f, "Packed({})", packed.path()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<TreeRef> for Value {
    fn from(tree: TreeRef) -> Self {
        Value::Tree(tree)
    }
}

impl From<Function> for Value {
    fn from(function: Function) -> Self {
        Value::Function(function)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Functions
// ═══════════════════════════════════════════════════════════════════════════

/// Arguments and receiver for one function call.
pub struct Invocation {
    /// Positional arguments; `None` for an argument that evaluated to absent.
    pub args: Vec<Option<Value>>,
    /// The calling scope, or the receiver the function was bound to.
    pub this: Option<TreeRef>,
}

impl Invocation {
    /// The argument at `index`, if present.
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index).and_then(Option::as_ref)
    }

    /// Take ownership of the argument at `index`.
    pub fn take(&mut self, index: usize) -> Option<Value> {
        self.args.get_mut(index).and_then(Option::take)
    }
}

pub type FunctionFuture = BoxFuture<'static, TreeResult<Option<Value>>>;

type FunctionBody = dyn Fn(Invocation) -> FunctionFuture + Send + Sync;

/// An async callable value.
#[derive(Clone)]
pub struct Function {
    name: Arc<str>,
    body: Arc<FunctionBody>,
    receiver: Option<TreeRef>,
}

impl Function {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TreeResult<Option<Value>>> + Send + 'static,
    {
        let body: Arc<FunctionBody> =
            Arc::new(move |invocation: Invocation| -> FunctionFuture { Box::pin(f(invocation)) });
        Self {
            name: Arc::from(name.into()),
            body,
            receiver: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A copy of this function whose `this` is always `receiver`.
    pub fn bind(&self, receiver: TreeRef) -> Function {
        Function {
            name: self.name.clone(),
            body: self.body.clone(),
            receiver: Some(receiver),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.receiver.is_some()
    }

    /// Call with `args`; a bound receiver takes precedence over `this`.
    pub async fn call(&self, args: Vec<Option<Value>>, this: Option<TreeRef>) -> TreeResult<Option<Value>> {
        let this = self.receiver.clone().or(this);
        (self.body)(Invocation { args, this }).await
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("bound", &self.receiver.is_some())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Getters
// ═══════════════════════════════════════════════════════════════════════════

struct ThunkInner {
    code: Arc<Code>,
    scope: Option<TreeRef>,
    cell: OnceCell<Option<Value>>,
}

/// A compute-once cell around a compiled expression.
///
/// A thunk created without a scope is evaluated in the scope supplied by
/// whoever forces it first; tree backends pass their own scope, so a getter
/// stored in a record sees the record's keys.
#[derive(Clone)]
pub struct Thunk {
    inner: Arc<ThunkInner>,
}

impl Thunk {
    pub fn new(code: Arc<Code>, scope: Option<TreeRef>) -> Self {
        Self {
            inner: Arc::new(ThunkInner {
                code,
                scope,
                cell: OnceCell::new(),
            }),
        }
    }

    pub fn code(&self) -> &Code {
        &self.inner.code
    }

    pub fn is_forced(&self) -> bool {
        self.inner.cell.initialized()
    }

    /// Evaluate on first call; later calls return the remembered result.
    pub async fn force(&self, fallback_scope: Option<TreeRef>) -> TreeResult<Option<Value>> {
        let value = self
            .inner
            .cell
            .get_or_try_init(|| async move {
                let scope = self
                    .inner
                    .scope
                    .clone()
                    .or(fallback_scope)
                    .unwrap_or_else(interpreter::builtins);
                interpreter::evaluate(&self.inner.code, scope).await
            })
            .await?;
        Ok(value.clone())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Packed file content
// ═══════════════════════════════════════════════════════════════════════════

struct PackedInner {
    bytes: Vec<u8>,
    loader: Loader,
    path: String,
    container: Option<TreeRef>,
    unpacked: OnceCell<Value>,
}

/// File content paired with the loader that knows how to interpret it.
///
/// Unpacking happens on demand, when the value is called or traversed, and
/// is remembered.
#[derive(Clone)]
pub struct Packed {
    inner: Arc<PackedInner>,
}

impl Packed {
    /// `container` is the tree the content came from; template loaders use it
    /// as the scope for their expressions.
    pub fn new(bytes: Vec<u8>, loader: Loader, path: impl Into<String>, container: Option<TreeRef>) -> Self {
        Self {
            inner: Arc::new(PackedInner {
                bytes,
                loader,
                path: path.into(),
                container,
                unpacked: OnceCell::new(),
            }),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.inner.bytes
    }

    pub fn loader(&self) -> Loader {
        self.inner.loader
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// The content as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.inner.bytes).into_owned()
    }

    /// Run the loader, once.
    pub async fn unpack(&self) -> TreeResult<Value> {
        let value = self
            .inner
            .unpacked
            .get_or_try_init(|| {
                self.inner
                    .loader
                    .load(&self.inner.bytes, &self.inner.path, self.inner.container.clone())
            })
            .await?;
        Ok(value.clone())
    }
}
