//! Key removal.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::try_join_all;
use grove_types::Key;

use crate::error::TreeResult;
use crate::ops;
use crate::tree::{ParentCell, Tree, TreeRef, adopt};
use crate::value::Value;

const KIND: &str = "SubtractTree";

/// `original` without the keys of `remove`.
///
/// A key both sides hold a subtree for stays, with the subtraction applied
/// inside it.
pub struct SubtractTree {
    original: TreeRef,
    remove: TreeRef,
    this: Weak<SubtractTree>,
    parent: ParentCell,
}

impl SubtractTree {
    pub fn new(original: TreeRef, remove: TreeRef) -> Arc<Self> {
        Arc::new_cyclic(|this| SubtractTree {
            original,
            remove,
            this: this.clone(),
            parent: ParentCell::default(),
        })
    }
}

#[async_trait]
impl Tree for SubtractTree {
    async fn get(&self, key: &Key) -> TreeResult<Option<Value>> {
        let Some(value) = self.original.get(key).await? else {
            return Ok(None);
        };
        let value = match (value, self.remove.get(key).await?) {
            (Value::Tree(original), Some(Value::Tree(remove))) => Value::Tree(SubtractTree::new(original, remove)),
            (_, Some(_)) => return Ok(None),
            (value, None) => value,
        };
        adopt(&value, self.this.clone());
        Ok(Some(value))
    }

    async fn keys(&self) -> TreeResult<Vec<String>> {
        let keys = self.original.keys().await?;
        let kept = try_join_all(keys.iter().map(|key| async move {
            if !ops::has(&self.remove, key).await? {
                return Ok(true);
            }
            self.remove.is_key_for_subtree(key).await
        }))
        .await?;
        Ok(keys.into_iter().zip(kept).filter_map(|(key, keep)| keep.then_some(key)).collect())
    }

    fn kind(&self) -> &'static str {
        KIND
    }

    fn parent(&self) -> Option<TreeRef> {
        self.parent.get()
    }

    fn set_parent(&self, parent: Weak<dyn Tree>) {
        self.parent.set(parent);
    }
}
