//! In-memory tree over a record of fields.
//!
//! A [`Record`] is an ordered map of fields plus an optional base record.
//! Keys are gathered from every layer; lookups fall through to the base when
//! the own fields don't have a name. A function found in a base layer is
//! handed out bound to the tree, so it sees the tree as its receiver.

use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use grove_types::{Key, add_trailing_slash, has_trailing_slash, remove_trailing_slash, slash_if, toggle_trailing_slash};
use indexmap::{IndexMap, IndexSet};
use tokio::sync::broadcast;

use super::{CHANGE_CHANNEL_CAPACITY, MutableTree, ParentCell, Tree, TreeRef, adopt, upgrade};
use crate::error::{TreeError, TreeResult};
use crate::scope::Scope;
use crate::value::Value;

const KIND: &str = "ObjectTree";

/// Fields of an in-memory tree, with an optional base layer.
#[derive(Clone, Default)]
pub struct Record {
    fields: IndexMap<String, Value>,
    is_sequence: bool,
    base: Option<Arc<Record>>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// A record whose keys are `0`, `1`, ... in order.
    pub fn sequence<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let fields = values
            .into_iter()
            .enumerate()
            .map(|(index, value)| (index.to_string(), value))
            .collect();
        Self {
            fields,
            is_sequence: true,
            base: None,
        }
    }

    /// A record that inherits every field of `base` it doesn't define itself.
    pub fn with_base(base: Arc<Record>) -> Self {
        Self {
            base: Some(base),
            ..Self::default()
        }
    }

    /// Builder-style insert.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    pub fn is_sequence(&self) -> bool {
        self.is_sequence
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Look `key` up through the layers. The flag is true when the value came
    /// from a base layer.
    fn lookup(&self, key: &str) -> Option<(Value, bool)> {
        if let Some(value) = self.fields.get(key) {
            return Some((value.clone(), false));
        }
        let mut layer = self.base.as_deref();
        while let Some(record) = layer {
            if let Some(value) = record.fields.get(key) {
                return Some((value.clone(), true));
            }
            layer = record.base.as_deref();
        }
        None
    }

    /// Every field name across the layers, own fields first, with its value.
    fn layered_entries(&self) -> Vec<(String, Value)> {
        let mut seen = IndexSet::new();
        let mut entries = Vec::new();
        let mut layer = Some(self);
        while let Some(record) = layer {
            for (name, value) in &record.fields {
                if seen.insert(name.clone()) {
                    entries.push((name.clone(), value.clone()));
                }
            }
            layer = record.base.as_deref();
        }
        entries
    }

    /// The own-field name under which `key` or its alternate form is stored.
    fn existing_key(&self, key: &str) -> Option<String> {
        if self.fields.contains_key(key) {
            return Some(key.to_string());
        }
        let alternate = toggle_trailing_slash(key);
        self.fields.contains_key(&alternate).then_some(alternate)
    }
}

/// A mutable tree over a [`Record`].
pub struct ObjectTree {
    record: RwLock<Record>,
    this: Weak<ObjectTree>,
    parent: ParentCell,
    adopts_children: bool,
    /// Scope for getters, in place of the tree's own ancestors.
    enclosing: Option<TreeRef>,
    changes: broadcast::Sender<String>,
}

impl ObjectTree {
    pub fn new(record: Record) -> Arc<Self> {
        Self::build(record, true, None)
    }

    /// A tree whose getters evaluate with the tree in front of `enclosing`,
    /// as for an object literal written inside an expression.
    pub fn with_scope(record: Record, enclosing: TreeRef) -> Arc<Self> {
        Self::build(record, true, Some(enclosing))
    }

    /// A tree of contextual bindings prepended to a scope.
    ///
    /// Ambient trees don't become the parent of the subtrees they hand out:
    /// binding `.` to a directory must not change that directory's scope.
    pub fn ambient<I, K>(bindings: I) -> Arc<Self>
    where
        I: IntoIterator<Item = (K, Option<Value>)>,
        K: Into<String>,
    {
        let mut record = Record::new();
        for (key, value) in bindings {
            if let Some(value) = value {
                record.insert(key, value);
            }
        }
        Self::build(record, false, None)
    }

    /// Convenience constructor from name/value pairs.
    pub fn from_pairs<I, K>(pairs: I) -> Arc<Self>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut record = Record::new();
        for (key, value) in pairs {
            record.insert(key, value);
        }
        Self::new(record)
    }

    /// Wrap a JSON document. Objects and arrays become nested trees.
    pub fn from_json(json: &serde_json::Value) -> Arc<Self> {
        Self::new(record_from_json(json))
    }

    fn build(record: Record, adopts_children: bool, enclosing: Option<TreeRef>) -> Arc<Self> {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Arc::new_cyclic(|this| ObjectTree {
            record: RwLock::new(record),
            this: this.clone(),
            parent: ParentCell::default(),
            adopts_children,
            enclosing,
            changes,
        })
    }

    /// A snapshot of the current record.
    pub fn record(&self) -> TreeResult<Record> {
        Ok(self.read()?.clone())
    }

    fn read(&self) -> TreeResult<std::sync::RwLockReadGuard<'_, Record>> {
        self.record
            .read()
            .map_err(|_| TreeError::Eval("record lock poisoned".into()))
    }

    fn write(&self) -> TreeResult<std::sync::RwLockWriteGuard<'_, Record>> {
        self.record
            .write()
            .map_err(|_| TreeError::Eval("record lock poisoned".into()))
    }

    /// Find the value for `name`, trying the alternate slash form.
    ///
    /// The flag in the result says whether a slash key fell back to its bare
    /// form, in which case the caller must check the value is a tree.
    fn find(&self, name: &str) -> TreeResult<Option<(Value, bool, bool)>> {
        let record = self.read()?;
        if let Some((value, inherited)) = record.lookup(name) {
            return Ok(Some((value, inherited, false)));
        }
        if has_trailing_slash(name) {
            let bare = remove_trailing_slash(name);
            Ok(record.lookup(bare).map(|(value, inherited)| (value, inherited, true)))
        } else {
            let slashed = add_trailing_slash(name);
            Ok(record.lookup(&slashed).map(|(value, inherited)| (value, inherited, false)))
        }
    }
}

#[async_trait]
impl Tree for ObjectTree {
    async fn get(&self, key: &Key) -> TreeResult<Option<Value>> {
        let Some(name) = key.name() else {
            return Err(TreeError::NullKey { tree: KIND });
        };
        let Some((value, inherited, must_be_tree)) = self.find(name)? else {
            return Ok(None);
        };

        let value = match value {
            Value::Lazy(thunk) => {
                let this = upgrade(&self.this, KIND)?;
                let scope = match &self.enclosing {
                    Some(enclosing) => Scope::prepend(vec![this], enclosing.clone()),
                    None => Scope::of(&this),
                };
                match thunk.force(Some(scope)).await? {
                    Some(value) => value,
                    None => return Ok(None),
                }
            }
            other => other,
        };
        if must_be_tree && !value.is_treelike() {
            return Ok(None);
        }

        if self.adopts_children {
            adopt(&value, self.this.clone());
        }

        match value {
            Value::Function(function) if inherited && !function.is_bound() => {
                Ok(Some(Value::Function(function.bind(upgrade(&self.this, KIND)?))))
            }
            other => Ok(Some(other)),
        }
    }

    async fn keys(&self) -> TreeResult<Vec<String>> {
        let entries = self.read()?.layered_entries();
        let mut keys = IndexSet::with_capacity(entries.len());
        for (name, value) in entries {
            keys.insert(slash_if(&name, value.is_treelike()));
        }
        Ok(keys.into_iter().collect())
    }

    async fn is_key_for_subtree(&self, key: &str) -> TreeResult<bool> {
        let record = self.read()?;
        Ok(record
            .lookup(key)
            .or_else(|| record.lookup(&toggle_trailing_slash(key)))
            .is_some_and(|(value, _)| value.is_treelike()))
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

    fn as_mutable(&self) -> Option<&dyn MutableTree> {
        Some(self)
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<String>> {
        Some(self.changes.subscribe())
    }
}

#[async_trait]
impl MutableTree for ObjectTree {
    async fn set(&self, key: &str, value: Option<Value>) -> TreeResult<()> {
        {
            let mut record = self.write()?;
            let existing = record.existing_key(key);
            match value {
                None => {
                    if let Some(existing) = existing {
                        record.fields.shift_remove(&existing);
                    }
                }
                Some(value) => {
                    if let Some(existing) = existing.filter(|existing| existing != key) {
                        record.fields.shift_remove(&existing);
                    }
                    record.fields.insert(key.to_string(), value);
                }
            }
        }
        // No receivers is fine.
        let _ = self.changes.send(remove_trailing_slash(key).to_string());
        Ok(())
    }
}

fn record_from_json(json: &serde_json::Value) -> Record {
    match json {
        serde_json::Value::Array(items) => Record::sequence(items.iter().map(value_from_json)),
        serde_json::Value::Object(map) => {
            let mut record = Record::new();
            for (key, value) in map {
                record.insert(key.clone(), value_from_json(value));
            }
            record
        }
        other => Record::new().field("0", value_from_json(other)),
    }
}

/// Convert a JSON value; objects and arrays become trees.
pub fn value_from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
            Value::Tree(ObjectTree::new(record_from_json(json)))
        }
    }
}
