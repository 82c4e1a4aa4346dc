//! The tree protocol and its backends.
//!
//! A tree answers `get(key)` and `keys()`. Everything in grove is a tree:
//! records, directories, remote sites, scope chains, and transforms over
//! other trees. Trees are shared as `Arc<dyn Tree>` ([`TreeRef`]).
//!
//! # Trailing slashes
//!
//! A key ending in `/` names a subtree. Backends look up the exact form
//! first, then the alternate form; a slash-bearing key falls back to its
//! bare form only when the bare value is itself a tree, so a file can't be
//! mistaken for a directory.
//!
//! # Parents
//!
//! When `get` produces a subtree, the producing tree records itself as the
//! subtree's parent. Parents are weak and only used to build scopes.

mod files;
pub mod loaders;
mod object;
mod site;

pub use files::FileTree;
pub use object::{ObjectTree, Record};
pub use site::SiteTree;

use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use grove_types::{Key, has_trailing_slash};
use tokio::sync::broadcast;

use crate::error::TreeResult;
use crate::value::Value;

/// Shared handle to a tree.
pub type TreeRef = Arc<dyn Tree>;

/// Capacity of change-notification channels.
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Async key/value tree.
///
/// `get` returns `Ok(None)` both for a missing key and for a key that exists
/// without a value; only `keys()` can tell the two apart.
#[async_trait]
pub trait Tree: Send + Sync {
    /// The value for `key`, or `None`.
    ///
    /// `Key::Default` is a reference error unless the tree defines a
    /// default value.
    async fn get(&self, key: &Key) -> TreeResult<Option<Value>>;

    /// The tree's keys, each at most once, subtrees tagged with `/`.
    async fn keys(&self) -> TreeResult<Vec<String>>;

    /// True if `key` names a subtree.
    ///
    /// The default trusts a trailing slash and otherwise fetches the value.
    async fn is_key_for_subtree(&self, key: &str) -> TreeResult<bool> {
        if has_trailing_slash(key) {
            return Ok(true);
        }
        let value = self.get(&Key::from(key)).await?;
        Ok(value.as_ref().is_some_and(Value::is_treelike))
    }

    /// Backend name for diagnostics.
    fn kind(&self) -> &'static str {
        "Tree"
    }

    /// The tree that most recently produced this one, if still alive.
    fn parent(&self) -> Option<TreeRef> {
        None
    }

    /// Record `parent` as this tree's parent. Trees without a parent slot
    /// ignore it.
    fn set_parent(&self, _parent: Weak<dyn Tree>) {}

    /// Write access, for trees that support it.
    fn as_mutable(&self) -> Option<&dyn MutableTree> {
        None
    }

    /// Subscribe to change notifications carrying the changed key's name.
    fn subscribe(&self) -> Option<broadcast::Receiver<String>> {
        None
    }
}

/// A tree that accepts writes.
#[async_trait]
pub trait MutableTree: Tree {
    /// Store `value` under `key`; `None` deletes the key.
    ///
    /// Writing either the bare or slash form of a name clears a value stored
    /// under the other form.
    async fn set(&self, key: &str, value: Option<Value>) -> TreeResult<()>;
}

/// Weak, replaceable parent slot shared by tree implementations.
#[derive(Default)]
pub(crate) struct ParentCell {
    parent: RwLock<Option<Weak<dyn Tree>>>,
}

impl ParentCell {
    pub(crate) fn get(&self) -> Option<TreeRef> {
        self.parent
            .read()
            .ok()
            .and_then(|slot| slot.as_ref().and_then(Weak::upgrade))
    }

    pub(crate) fn set(&self, parent: Weak<dyn Tree>) {
        if let Ok(mut slot) = self.parent.write() {
            *slot = Some(parent);
        }
    }
}

/// Make `parent` the parent of `value` if it is a subtree.
pub(crate) fn adopt(value: &Value, parent: Weak<dyn Tree>) {
    if let Value::Tree(tree) = value {
        tree.set_parent(parent);
    }
}

/// Upgrade a tree's self-reference.
pub(crate) fn upgrade<T: Tree + 'static>(this: &Weak<T>, kind: &'static str) -> TreeResult<TreeRef> {
    match this.upgrade() {
        Some(tree) => Ok(tree),
        None => Err(crate::error::TreeError::Detached { tree: kind }),
    }
}
