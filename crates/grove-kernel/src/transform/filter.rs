//! Predicate filtering.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::try_join_all;
use grove_types::{Key, has_trailing_slash};

use crate::error::{TreeError, TreeResult};
use crate::tree::{ParentCell, Tree, TreeRef, adopt};
use crate::value::{Function, Value};

const KIND: &str = "FilterTree";

/// The inner tree restricted to values the predicate accepts.
///
/// The predicate is called with `(value, key)`. Subtrees are always kept
/// and filtered in turn.
pub struct FilterTree {
    inner: TreeRef,
    predicate: Function,
    this: Weak<FilterTree>,
    parent: ParentCell,
}

impl FilterTree {
    pub fn new(inner: TreeRef, predicate: Function) -> Arc<Self> {
        Arc::new_cyclic(|this| FilterTree {
            inner,
            predicate,
            this: this.clone(),
            parent: ParentCell::default(),
        })
    }

    async fn accepts(&self, key: &str, value: &Value) -> TreeResult<bool> {
        let args = vec![Some(value.clone()), Some(Value::String(key.to_string()))];
        let verdict = self.predicate.call(args, Some(self.inner.clone())).await?;
        Ok(verdict.as_ref().is_some_and(Value::is_truthy))
    }
}

#[async_trait]
impl Tree for FilterTree {
    async fn get(&self, key: &Key) -> TreeResult<Option<Value>> {
        let Some(name) = key.name() else {
            return Err(TreeError::NullKey { tree: KIND });
        };
        let Some(value) = self.inner.get(key).await? else {
            return Ok(None);
        };
        let value = match value {
            Value::Tree(subtree) => Value::Tree(FilterTree::new(subtree, self.predicate.clone())),
            other => {
                if !self.accepts(name, &other).await? {
                    return Ok(None);
                }
                other
            }
        };
        adopt(&value, self.this.clone());
        Ok(Some(value))
    }

    async fn keys(&self) -> TreeResult<Vec<String>> {
        let keys = self.inner.keys().await?;
        let kept = try_join_all(keys.iter().map(|key| async move {
            if has_trailing_slash(key) {
                return Ok(true);
            }
            match self.inner.get(&Key::from(key.as_str())).await? {
                Some(Value::Tree(_)) => Ok(true),
                Some(value) => self.accepts(key, &value).await,
                None => Ok(false),
            }
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
