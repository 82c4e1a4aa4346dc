//! Operations over any tree.
//!
//! Per-key work is always issued for every key before any of it is awaited,
//! then joined; results keep the order of `keys()` whatever order the
//! underlying I/O completes in.

use futures::future::{BoxFuture, join_all, try_join_all};
use grove_types::{Key, keys_from_path, remove_trailing_slash, toggle_trailing_slash};

use crate::error::{TraverseError, TreeError, TreeResult};
use crate::tree::TreeRef;
use crate::value::Value;

/// Follow `keys` from `tree`. An interior miss yields `None`.
pub async fn traverse(tree: &TreeRef, keys: &[String]) -> TreeResult<Option<Value>> {
    match traverse_or_throw(tree, keys).await {
        Err(TreeError::Traverse(_)) => Ok(None),
        other => other,
    }
}

/// Follow `keys` from `tree`, failing with [`TraverseError`] when a key has
/// nothing to be applied to.
///
/// Getters are forced and packed values unpacked before descending. A
/// function reached along the way is called with all remaining keys as its
/// arguments, and its result is the result of the traversal.
pub async fn traverse_or_throw(tree: &TreeRef, keys: &[String]) -> TreeResult<Option<Value>> {
    let mut value = Some(Value::Tree(tree.clone()));
    let mut last_value = None;
    let mut position = 0;

    while position < keys.len() {
        let Some(current) = value.take() else {
            return Err(TraverseError {
                keys: keys.to_vec(),
                position,
                last_value,
            }
            .into());
        };
        let Some(current) = current.resolve(None).await? else {
            value = None;
            continue;
        };
        last_value = Some(current.clone());

        match current {
            Value::Tree(tree) => {
                value = tree.get(&Key::from(keys[position].as_str())).await?;
                position += 1;
            }
            Value::Packed(packed) => {
                value = Some(packed.unpack().await?);
            }
            Value::Function(function) => {
                let args = keys[position..]
                    .iter()
                    .map(|key| Some(Value::String(key.clone())))
                    .collect();
                return function.call(args, None).await;
            }
            _ => {
                value = None;
                position += 1;
            }
        }
    }

    match value {
        Some(value) => value.resolve(None).await,
        None => Ok(None),
    }
}

/// Traverse a slash-separated path (`a/b/c`).
pub async fn traverse_path(tree: &TreeRef, path: &str) -> TreeResult<Option<Value>> {
    traverse(tree, &keys_from_path(path)).await
}

/// The tree's keys.
pub async fn keys_of(tree: &TreeRef) -> TreeResult<Vec<String>> {
    tree.keys().await
}

pub async fn is_key_for_subtree(tree: &TreeRef, key: &str) -> TreeResult<bool> {
    tree.is_key_for_subtree(key).await
}

/// True if `key` (in either slash form) is one of the tree's keys.
pub async fn has(tree: &TreeRef, key: &str) -> TreeResult<bool> {
    let alternate = toggle_trailing_slash(key);
    Ok(tree
        .keys()
        .await?
        .iter()
        .any(|k| k == key || *k == alternate))
}

/// Delete `key` from a mutable tree. Returns whether it was present.
pub async fn remove(tree: &TreeRef, key: &str) -> TreeResult<bool> {
    let Some(mutable) = tree.as_mutable() else {
        return Err(TreeError::NotMutable { tree: tree.kind() });
    };
    let existed = has(tree, key).await?;
    mutable.set(key, None).await?;
    Ok(existed)
}

/// Every key with its value, in key order.
pub async fn entries(tree: &TreeRef) -> TreeResult<Vec<(String, Option<Value>)>> {
    let keys = tree.keys().await?;
    let values = try_join_all(keys.iter().map(|key| async move { tree.get(&Key::from(key.as_str())).await })).await?;
    Ok(keys.into_iter().zip(values).collect())
}

/// Every value, in key order.
pub async fn values(tree: &TreeRef) -> TreeResult<Vec<Option<Value>>> {
    let keys = tree.keys().await?;
    try_join_all(keys.iter().map(|key| async move { tree.get(&Key::from(key.as_str())).await })).await
}

/// Copy every entry of `source` into the mutable tree `target`.
///
/// When both sides hold a subtree under the same key the copy recurses into
/// it instead of replacing it. All writes are issued concurrently.
pub fn assign<'a>(target: &'a TreeRef, source: &'a TreeRef) -> BoxFuture<'a, TreeResult<()>> {
    Box::pin(async move {
        let Some(mutable) = target.as_mutable() else {
            return Err(TreeError::NotMutable { tree: target.kind() });
        };
        let keys = source.keys().await?;
        try_join_all(keys.iter().map(|key| async move {
            let name = Key::from(key.as_str());
            let value = source.get(&name).await?;
            if let Some(Value::Tree(source_subtree)) = &value {
                if let Some(Value::Tree(target_subtree)) = target.get(&name).await? {
                    if target_subtree.as_mutable().is_some() {
                        return assign(&target_subtree, source_subtree).await;
                    }
                }
            }
            mutable.set(key, value).await
        }))
        .await?;
        Ok(())
    })
}

/// Reduce a tree bottom-up.
///
/// Each terminal value goes through `map`; each subtree is reduced first.
/// `reduce` receives a level's values in key order along with the keys.
pub fn map_reduce<'a, M, R>(tree: TreeRef, map: &'a M, reduce: &'a R) -> BoxFuture<'a, TreeResult<Option<Value>>>
where
    M: Fn(Option<Value>) -> BoxFuture<'a, TreeResult<Option<Value>>> + Sync,
    R: Fn(Vec<String>, Vec<Option<Value>>) -> TreeResult<Option<Value>> + Sync,
{
    Box::pin(async move {
        let keys = tree.keys().await?;
        let values = try_join_all(keys.iter().map(|key| {
            let tree = tree.clone();
            async move {
                match tree.get(&Key::from(key.as_str())).await? {
                    Some(Value::Tree(subtree)) => map_reduce(subtree, map, reduce).await,
                    other => map(other).await,
                }
            }
        }))
        .await?;
        reduce(keys, values)
    })
}

/// Resolve a tree into plain JSON.
///
/// Levels whose keys are exactly `0..n` become arrays; other levels become
/// objects keyed without trailing slashes.
pub fn plain(tree: TreeRef) -> BoxFuture<'static, TreeResult<serde_json::Value>> {
    Box::pin(async move {
        let keys = tree.keys().await?;
        let values = join_all(keys.iter().map(|key| {
            let tree = tree.clone();
            async move {
                match tree.get(&Key::from(key.as_str())).await? {
                    Some(value) => plain_value(value).await,
                    None => Ok(serde_json::Value::Null),
                }
            }
        }))
        .await
        .into_iter()
        .collect::<TreeResult<Vec<_>>>()?;

        let is_array = keys
            .iter()
            .enumerate()
            .all(|(index, key)| remove_trailing_slash(key) == index.to_string());
        if is_array && !keys.is_empty() {
            return Ok(serde_json::Value::Array(values));
        }
        let object = keys
            .iter()
            .map(|key| remove_trailing_slash(key).to_string())
            .zip(values)
            .collect();
        Ok(serde_json::Value::Object(object))
    })
}

/// Plain JSON for a single value.
pub fn plain_value(value: Value) -> BoxFuture<'static, TreeResult<serde_json::Value>> {
    Box::pin(async move {
        let Some(value) = value.resolve(None).await? else {
            return Ok(serde_json::Value::Null);
        };
        Ok(match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(n) => serde_json::Value::from(n),
            Value::Float(f) => serde_json::Value::from(f),
            Value::String(s) => serde_json::Value::String(s),
            Value::Bytes(bytes) => serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned()),
            Value::Packed(packed) => serde_json::Value::String(packed.text()),
            Value::Tree(tree) => plain(tree).await?,
            Value::Function(_) | Value::Lazy(_) => serde_json::Value::Null,
        })
    })
}
