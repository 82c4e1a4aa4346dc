//! Trees computed from other trees.
//!
//! Transforms hold their inputs and do their work lazily: `keys()` and
//! `get()` consult the inner trees on every call, so a transform over a live
//! directory reflects the directory's current state. Subtrees of the inputs
//! come back wrapped in the same transform where that makes sense.

mod filter;
mod glob;
mod map;
mod matcher;
mod merge;
mod reverse;
mod shuffle;
mod subtract;

pub use filter::FilterTree;
pub use glob::GlobTree;
pub use map::MapTree;
pub use matcher::{MatchTree, compile_pattern};
pub use merge::MergeTree;
pub use reverse::ReverseTree;
pub use shuffle::ShuffleTree;
pub use subtract::SubtractTree;
