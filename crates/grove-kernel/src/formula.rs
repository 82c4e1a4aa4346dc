//! The formula engine.
//!
//! A raw key of the form `pattern = expression`, or a bare pattern with a
//! placeholder such as `{name}.html`, is a formula. A [`FormulaTree`]
//! wraps a tree whose keys may be formulas and exposes the keys and values
//! they compute.
//!
//! # Implied keys
//!
//! `{name}.html = render({name}.md)` can produce `post.html` for every
//! `post.md` in the tree. The key set is the least fixed point: every
//! formula contributes the keys it implies from the working set until a
//! whole pass adds nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use grove_types::{Key, has_trailing_slash, remove_trailing_slash, sort_natural};
use indexmap::{IndexMap, IndexSet};
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::ast::{Code, KeySyntax, Pattern};
use crate::config::{GroveConfig, KeyOrder};
use crate::error::{ResultExt, TreeError, TreeResult};
use crate::interpreter;
use crate::parser;
use crate::scope::Scope;
use crate::tree::{MutableTree, ObjectTree, ParentCell, Tree, TreeRef, adopt, upgrade};
use crate::value::Value;

const KIND: &str = "FormulaTree";

/// A parsed formula key.
#[derive(Debug, Clone)]
pub struct Formula {
    source: String,
    pattern: Pattern,
    code: Option<Code>,
}

impl Formula {
    /// Parse `key` as a formula. Literal keys, and keys that don't parse,
    /// are not formulas.
    pub fn parse(key: &str) -> Option<Formula> {
        let syntax = match parser::parse_key(key) {
            Ok(syntax) => syntax,
            Err(err) => {
                tracing::trace!(%key, error = %err, "literal key");
                return None;
            }
        };
        let (pattern, code) = match syntax {
            KeySyntax::Assignment { pattern, code } => (pattern, Some(code)),
            KeySyntax::Reference(pattern @ Pattern::Variable { .. }) => (pattern, None),
            KeySyntax::Reference(Pattern::Literal(_)) => return None,
        };
        Some(Formula {
            source: key.to_string(),
            pattern,
            code,
        })
    }

    /// The raw key this formula was parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn code(&self) -> Option<&Code> {
        self.code.as_ref()
    }

    /// The key this formula lists: its literal name or its pattern text.
    pub fn key(&self) -> String {
        self.pattern.to_string()
    }

    /// Variable names bound by the pattern.
    pub fn bindings(&self) -> Vec<&str> {
        self.pattern.variable().into_iter().collect()
    }

    /// Match `key` against the pattern, returning the variable bindings.
    pub fn unify(&self, key: &str) -> Option<IndexMap<String, String>> {
        let key = remove_trailing_slash(key);
        match &self.pattern {
            Pattern::Literal(name) => (remove_trailing_slash(name) == key).then(IndexMap::new),
            Pattern::Variable { name, suffix } => {
                let value = bind(key, suffix.as_deref())?;
                Some(IndexMap::from([(name.clone(), value.to_string())]))
            }
        }
    }

    /// Keys this formula implies from `keys` that aren't already in it.
    ///
    /// For `{x}.html = f({x}.md)`, each `a.md` in `keys` implies `a.html`.
    pub fn implied_keys(&self, keys: &IndexSet<String>) -> Vec<String> {
        let (Pattern::Variable { name, suffix }, Some(code)) = (&self.pattern, &self.code) else {
            return Vec::new();
        };

        let mut sources = Vec::new();
        code.walk(&mut |node| {
            if let Code::Variable {
                name: variable,
                suffix: source_suffix,
            } = node
            {
                if variable == name && !sources.contains(source_suffix) {
                    sources.push(source_suffix.clone());
                }
            }
        });

        let mut implied = Vec::new();
        for key in keys {
            for source_suffix in &sources {
                let Some(value) = bind(remove_trailing_slash(key), source_suffix.as_deref()) else {
                    continue;
                };
                let candidate = format!("{value}{}", suffix.as_deref().unwrap_or(""));
                if !keys.contains(&candidate) && !implied.contains(&candidate) {
                    implied.push(candidate);
                }
            }
        }
        implied
    }
}

/// The value a placeholder takes for `key`, given the literal suffix after
/// it. Keys containing `{` are patterns themselves and never bind.
fn bind<'a>(key: &'a str, suffix: Option<&str>) -> Option<&'a str> {
    if key.contains('{') {
        return None;
    }
    let value = match suffix {
        Some(suffix) => key.strip_suffix(suffix)?,
        None => key,
    };
    (!value.is_empty()).then_some(value)
}

/// Add every implied key to `keys` until a pass adds none, or `max_passes`
/// is reached. Returns the number of passes that added keys.
pub fn expand_keys(formulas: &[Formula], keys: &mut IndexSet<String>, max_passes: usize) -> usize {
    let mut passes = 0;
    loop {
        let before = keys.len();
        for formula in formulas {
            let implied = formula.implied_keys(keys);
            keys.extend(implied);
        }
        if keys.len() == before {
            return passes;
        }
        passes += 1;
        if passes >= max_passes {
            tracing::warn!(passes, keys = keys.len(), "implied keys still growing, giving up");
            return passes;
        }
    }
}

struct FormulaState {
    formulas: Vec<Formula>,
    keys: Vec<String>,
}

/// A tree whose keys may be formulas.
///
/// Raw values always win; formulas are tried in declaration order only for
/// keys the inner tree has no value for. Raw subtrees come back as formula
/// trees themselves. The parsed formulas and key set are cached until the
/// inner tree reports a change.
pub struct FormulaTree {
    inner: TreeRef,
    config: Arc<GroveConfig>,
    state: Mutex<Option<Arc<FormulaState>>>,
    changes: Mutex<Option<broadcast::Receiver<String>>>,
    children: Mutex<HashMap<String, (usize, Arc<FormulaTree>)>>,
    this: Weak<FormulaTree>,
    parent: ParentCell,
}

impl FormulaTree {
    pub fn new(inner: TreeRef, config: Arc<GroveConfig>) -> Arc<Self> {
        let changes = inner.subscribe();
        Arc::new_cyclic(|this| FormulaTree {
            inner,
            config,
            state: Mutex::new(None),
            changes: Mutex::new(changes),
            children: Mutex::new(HashMap::new()),
            this: this.clone(),
            parent: ParentCell::default(),
        })
    }

    pub fn inner(&self) -> &TreeRef {
        &self.inner
    }

    /// The parsed formulas, in declaration order.
    pub async fn formulas(&self) -> TreeResult<Vec<Formula>> {
        Ok(self.state().await?.formulas.clone())
    }

    /// True if the inner tree changed since the state was built.
    fn drain_changes(&self) -> bool {
        let Ok(mut changes) = self.changes.lock() else {
            return true;
        };
        let Some(receiver) = changes.as_mut() else {
            return false;
        };
        let mut changed = false;
        loop {
            match receiver.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => changed = true,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return changed,
            }
        }
    }

    async fn state(&self) -> TreeResult<Arc<FormulaState>> {
        if self.drain_changes() {
            tracing::debug!("inner tree changed, rebuilding formulas");
            self.invalidate();
        }
        if let Some(state) = self.state.lock().ok().and_then(|state| state.clone()) {
            return Ok(state);
        }
        let state = Arc::new(self.build_state().await?);
        if let Ok(mut slot) = self.state.lock() {
            *slot = Some(state.clone());
        }
        Ok(state)
    }

    fn invalidate(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = None;
        }
        if let Ok(mut children) = self.children.lock() {
            children.clear();
        }
    }

    #[tracing::instrument(level = "debug", skip(self), fields(inner = self.inner.kind()))]
    async fn build_state(&self) -> TreeResult<FormulaState> {
        let raw_keys = self.inner.keys().await?;
        let mut formulas = Vec::new();
        let mut keys = IndexSet::with_capacity(raw_keys.len());
        for raw in raw_keys {
            match Formula::parse(&raw) {
                Some(formula) => {
                    keys.insert(formula.key());
                    formulas.push(formula);
                }
                None => {
                    keys.insert(raw);
                }
            }
        }

        let passes = expand_keys(&formulas, &mut keys, self.config.max_implication_passes);
        tracing::debug!(formulas = formulas.len(), keys = keys.len(), passes, "formulas built");

        let mut keys: Vec<String> = keys.into_iter().collect();
        if self.config.key_order == KeyOrder::Natural {
            sort_natural(&mut keys);
        }
        Ok(FormulaState { formulas, keys })
    }

    /// Wrap a raw subtree so formulas inside it work too.
    fn child(&self, name: &str, subtree: TreeRef) -> TreeResult<Value> {
        let identity = Arc::as_ptr(&subtree) as *const () as usize;
        let name = remove_trailing_slash(name).to_string();
        let mut children = self
            .children
            .lock()
            .map_err(|_| TreeError::Eval("formula tree lock poisoned".into()))?;
        if let Some((cached, child)) = children.get(&name) {
            if *cached == identity {
                return Ok(Value::Tree(child.clone()));
            }
        }
        let child = FormulaTree::new(subtree, self.config.clone());
        child.set_parent(self.this.clone());
        children.insert(name, (identity, child.clone()));
        Ok(Value::Tree(child))
    }

    async fn evaluate(&self, formula: &Formula, bindings: IndexMap<String, String>) -> TreeResult<Option<Value>> {
        let this = upgrade(&self.this, KIND)?;
        let arguments: Vec<Option<Value>> = bindings.values().map(|value| Some(Value::String(value.clone()))).collect();
        let ambient: TreeRef = ObjectTree::ambient(
            bindings
                .into_iter()
                .map(|(name, value)| (name, Some(Value::String(value)))),
        );
        let scope = Scope::prepend(vec![ambient], Scope::of(&this));

        let value = match &formula.code {
            Some(code) => interpreter::evaluate(code, scope)
                .await
                .with_context(|| format!("evaluating {}", formula.source))?,
            None => {
                // A bare pattern's own value computes the result from the binding.
                let Some(raw) = self.inner.get(&Key::from(formula.source.as_str())).await? else {
                    return Ok(None);
                };
                let raw = match raw {
                    Value::Packed(packed) => packed.unpack().await?,
                    other => other,
                };
                match raw {
                    Value::Function(function) => function
                        .call(arguments, Some(scope))
                        .await
                        .with_context(|| format!("evaluating {}", formula.source))?,
                    other => Some(other),
                }
            }
        };
        match value {
            Some(value) => value.resolve(None).await,
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Tree for FormulaTree {
    #[tracing::instrument(level = "trace", skip(self))]
    async fn get(&self, key: &Key) -> TreeResult<Option<Value>> {
        let Some(name) = key.name() else {
            return Err(TreeError::NullKey { tree: KIND });
        };

        if let Some(value) = self.inner.get(key).await? {
            return match value {
                Value::Tree(subtree) => self.child(name, subtree).map(Some),
                other => Ok(Some(other)),
            };
        }

        let state = self.state().await?;
        for formula in &state.formulas {
            let Some(bindings) = formula.unify(name) else {
                continue;
            };
            if let Some(value) = self.evaluate(formula, bindings).await? {
                adopt(&value, self.this.clone());
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    async fn keys(&self) -> TreeResult<Vec<String>> {
        Ok(self.state().await?.keys.clone())
    }

    async fn is_key_for_subtree(&self, key: &str) -> TreeResult<bool> {
        if has_trailing_slash(key) || self.inner.is_key_for_subtree(key).await? {
            return Ok(true);
        }
        let value = self.get(&Key::from(key)).await?;
        Ok(value.as_ref().is_some_and(Value::is_treelike))
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
        self.inner.as_mutable()
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<String>> {
        self.inner.subscribe()
    }
}
