//! Interpreter for the expression language.
//!
//! # Architecture
//!
//! - **eval**: reduces [`Code`](crate::ast::Code) to values against a scope
//!   tree, and applies callees to arguments
//! - **builtins**: the functions every scope ends in (`map`, `filter`,
//!   `merge`, ...)
//!
//! Evaluation is async throughout: looking a name up is a tree `get`, which
//! may read a file or fetch a URL. An unresolved name is not an error; it
//! evaluates to `None` and propagates through calls.
//!
//! # Example
//!
//! ```
//! use grove_kernel::interpreter::{builtins, evaluate};
//! use grove_kernel::parser::parse_expression;
//! use grove_kernel::scope::Scope;
//! use grove_kernel::tree::{ObjectTree, TreeRef};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let data: TreeRef = ObjectTree::from_json(&serde_json::json!({"name": "Bob"}));
//! let scope = Scope::prepend(vec![data], builtins());
//! let code = parse_expression("concat('Hi ', name)").unwrap();
//! let value = evaluate(&code, scope).await.unwrap();
//! assert_eq!(value.and_then(|v| v.to_text()).as_deref(), Some("Hi Bob"));
//! # });
//! ```

mod builtins;
mod eval;

pub use builtins::{builtins, to_function, to_tree};
pub use eval::{evaluate, invoke, stringify};
