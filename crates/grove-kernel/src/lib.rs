//! grove-kernel: async trees, scope chains, formulas and templates.
//!
//! This crate provides:
//!
//! - **Trees**: the async `get`/`keys` protocol and its backends (records,
//!   directories, remote sites)
//! - **Transforms**: map, filter, reverse, merge, subtract and glob trees
//! - **Scope**: ordered chains of trees for name resolution
//! - **Lexer / Parser / AST**: the expression language, via logos and chumsky
//! - **Interpreter**: async evaluation of expressions, and the builtins
//! - **Formulas**: keys like `{name}.html = page({name}.md)` computing values
//!   and implying keys
//! - **Templates**: `{{ expression }}` documents with YAML front matter
//! - **Watch**: a shared file watcher feeding change notifications to trees

pub mod ast;
pub mod config;
pub mod error;
pub mod formula;
pub mod interpreter;
pub mod lexer;
pub mod ops;
pub mod parser;
pub mod scope;
pub mod template;
pub mod transform;
pub mod tree;
pub mod value;
pub mod watch;

pub use config::{GroveConfig, KeyOrder};
pub use error::{ResultExt, SyntaxError, TraverseError, TreeError, TreeResult};
pub use formula::{Formula, FormulaTree};
pub use scope::Scope;
pub use template::{Rendered, Template};
pub use tree::{FileTree, MutableTree, ObjectTree, Record, SiteTree, Tree, TreeRef};
pub use value::{Function, Invocation, Packed, Thunk, Value};
pub use watch::FileWatcher;

// Key types, for embedders that don't depend on grove-types directly
pub use grove_types::{Key, keys_from_path, natural_cmp, sort_natural};
