//! Key order shuffling.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use grove_types::Key;

use crate::error::{TreeError, TreeResult};
use crate::tree::{ParentCell, Tree, TreeRef, adopt};
use crate::value::Value;

const KIND: &str = "ShuffleTree";

/// The inner tree with its keys in a fresh random order on every listing,
/// at every level.
pub struct ShuffleTree {
    inner: TreeRef,
    this: Weak<ShuffleTree>,
    parent: ParentCell,
}

impl ShuffleTree {
    pub fn new(inner: TreeRef) -> Arc<Self> {
        Arc::new_cyclic(|this| ShuffleTree {
            inner,
            this: this.clone(),
            parent: ParentCell::default(),
        })
    }
}

/// Fisher-Yates over a splitmix64 stream seeded from the OS.
fn shuffle<T>(items: &mut [T]) -> TreeResult<()> {
    let mut state = getrandom::u64().map_err(|e| TreeError::Eval(format!("shuffle: no random seed: {e}")))?;
    for i in (1..items.len()).rev() {
        state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^= z >> 31;
        let j = (z % (i as u64 + 1)) as usize;
        items.swap(i, j);
    }
    Ok(())
}

#[async_trait]
impl Tree for ShuffleTree {
    async fn get(&self, key: &Key) -> TreeResult<Option<Value>> {
        let value = match self.inner.get(key).await? {
            Some(Value::Tree(subtree)) => Value::Tree(ShuffleTree::new(subtree)),
            Some(other) => other,
            None => return Ok(None),
        };
        adopt(&value, self.this.clone());
        Ok(Some(value))
    }

    async fn keys(&self) -> TreeResult<Vec<String>> {
        let mut keys = self.inner.keys().await?;
        shuffle(&mut keys)?;
        Ok(keys)
    }

    async fn is_key_for_subtree(&self, key: &str) -> TreeResult<bool> {
        self.inner.is_key_for_subtree(key).await
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
