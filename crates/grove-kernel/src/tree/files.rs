//! Directory-backed tree.
//!
//! Files come back as packed values (when a loader matches their extension)
//! or raw bytes; subdirectories come back as child `FileTree`s, created on
//! first access and cached until a change notification names them.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use grove_types::{Key, has_trailing_slash, remove_trailing_slash, slash_if, sort_natural};
use tokio::sync::broadcast;

use super::loaders::Loader;
use super::{CHANGE_CHANNEL_CAPACITY, MutableTree, ParentCell, Tree, TreeRef, upgrade};
use crate::config::GroveConfig;
use crate::error::{TreeError, TreeResult};
use crate::ops;
use crate::value::{Packed, Value};
use crate::watch::{FileWatcher, WatchId, WatchTarget};

const KIND: &str = "FileTree";

struct Watching {
    watcher: Arc<FileWatcher>,
    id: WatchId,
    /// Canonical path the registration was made under.
    dir: PathBuf,
}

/// A tree over a directory on the local file system.
pub struct FileTree {
    root: PathBuf,
    config: Arc<GroveConfig>,
    children: Mutex<HashMap<String, Arc<FileTree>>>,
    this: Weak<FileTree>,
    parent: ParentCell,
    changes: broadcast::Sender<String>,
    watching: Mutex<Option<Watching>>,
}

impl FileTree {
    /// Wrap the directory at `root`. The directory need not exist yet; it is
    /// created on the first write.
    pub fn new(root: impl Into<PathBuf>, config: Arc<GroveConfig>) -> Arc<Self> {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Arc::new_cyclic(|this| FileTree {
            root: root.into(),
            config,
            children: Mutex::new(HashMap::new()),
            this: this.clone(),
            parent: ParentCell::default(),
            changes,
            watching: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Start receiving change notifications for this directory.
    ///
    /// Subdirectory trees created from now on watch their own directories
    /// through the same watcher.
    pub async fn watch(&self, watcher: Arc<FileWatcher>) -> TreeResult<()> {
        let root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|err| TreeError::io(&self.root, err))?;
        self.register(&root, watcher)
    }

    /// Stop receiving change notifications.
    pub fn unwatch(&self) -> TreeResult<()> {
        let watching = self.lock_watching()?.take();
        if let Some(Watching { watcher, id, .. }) = watching {
            watcher.unregister(id)?;
        }
        Ok(())
    }

    pub fn is_watching(&self) -> bool {
        self.watching.lock().map(|w| w.is_some()).unwrap_or(false)
    }

    /// Load `key` through its loader, failing if the loader fails.
    ///
    /// A missing file is `None`; a file that fails to load is an error.
    #[tracing::instrument(level = "debug", skip(self), fields(root = %self.root.display()))]
    pub async fn import(&self, key: &str) -> TreeResult<Option<Value>> {
        let path = self.root.join(remove_trailing_slash(key));
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if is_missing(&err) => return Ok(None),
            Err(err) => return Err(TreeError::io(path, err)),
        };
        let loader = self.config.loader_for(key).unwrap_or(Loader::Text);
        let container = upgrade(&self.this, KIND)?;
        let value = loader
            .load(&bytes, &path.display().to_string(), Some(container))
            .await?;
        Ok(Some(value))
    }

    /// Drop the cached child for `name` and notify subscribers.
    pub fn on_change(&self, name: &str) {
        if let Ok(mut children) = self.children.lock() {
            children.remove(name);
        }
        let _ = self.changes.send(name.to_string());
    }

    fn register(&self, dir: &Path, watcher: Arc<FileWatcher>) -> TreeResult<()> {
        let mut watching = self.lock_watching()?;
        if watching.is_some() {
            return Ok(());
        }
        let target: Weak<dyn WatchTarget> = self.this.clone();
        let id = watcher.register(dir, target)?;
        *watching = Some(Watching {
            watcher,
            id,
            dir: dir.to_path_buf(),
        });
        Ok(())
    }

    fn lock_watching(&self) -> TreeResult<std::sync::MutexGuard<'_, Option<Watching>>> {
        self.watching
            .lock()
            .map_err(|_| TreeError::Eval("file tree lock poisoned".into()))
    }

    fn watcher(&self) -> Option<(Arc<FileWatcher>, PathBuf)> {
        self.watching
            .lock()
            .ok()
            .and_then(|w| w.as_ref().map(|w| (w.watcher.clone(), w.dir.clone())))
    }

    fn cached_child(&self, name: &str) -> Option<Arc<FileTree>> {
        self.children.lock().ok().and_then(|c| c.get(name).cloned())
    }

    /// The child tree for subdirectory `name`, creating and caching it.
    fn child(&self, name: &str) -> TreeResult<Arc<FileTree>> {
        if let Some(child) = self.cached_child(name) {
            return Ok(child);
        }
        let child = FileTree::new(self.root.join(name), self.config.clone());
        child.set_parent(self.this.clone());
        if let Some((watcher, dir)) = self.watcher() {
            child.register(&dir.join(name), watcher)?;
        }
        let mut children = self
            .children
            .lock()
            .map_err(|_| TreeError::Eval("file tree lock poisoned".into()))?;
        Ok(children.entry(name.to_string()).or_insert(child).clone())
    }

    fn file_path(&self, name: &str) -> TreeResult<PathBuf> {
        if name.contains('/') {
            return Err(TreeError::io(
                self.root.join(name),
                io::Error::new(io::ErrorKind::InvalidInput, "file names cannot contain '/'"),
            ));
        }
        Ok(self.root.join(name))
    }

    async fn write_value(&self, name: &str, value: Value) -> TreeResult<()> {
        let value = match value.resolve(None).await? {
            Some(value) => value,
            None => return self.delete(name).await,
        };

        if let Value::Tree(source) = value {
            // Data files hold a tree as a document rather than a directory.
            if let Some(loader) = self.config.loader_for(name).filter(|l| l.unpacks_to_tree()) {
                let data = ops::plain(source.clone()).await?;
                if let Some(bytes) = loader.serialize(&data)? {
                    return self.write_file(name, bytes).await;
                }
            }
            let path = self.file_path(name)?;
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|err| TreeError::io(&path, err))?;
            let target: TreeRef = self.child(name)?;
            return ops::assign(&target, &source).await;
        }

        let bytes = match value {
            Value::String(s) => s.into_bytes(),
            Value::Bytes(bytes) => bytes,
            Value::Packed(packed) => packed.bytes().to_vec(),
            Value::Function(function) => {
                return Err(TreeError::Eval(format!(
                    "cannot write function {} to a file",
                    function.name()
                )));
            }
            other => other.to_text().unwrap_or_default().into_bytes(),
        };
        self.write_file(name, bytes).await
    }

    async fn write_file(&self, name: &str, bytes: Vec<u8>) -> TreeResult<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|err| TreeError::io(&self.root, err))?;
        let path = self.file_path(name)?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|err| TreeError::io(&path, err))
    }

    async fn delete(&self, name: &str) -> TreeResult<()> {
        let path = self.file_path(name)?;
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(err) if is_missing(&err) => return Ok(()),
            Err(err) => return Err(TreeError::io(path, err)),
        };
        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) if is_missing(&err) => Ok(()),
            Err(err) => Err(TreeError::io(path, err)),
        }
    }
}

#[async_trait]
impl Tree for FileTree {
    #[tracing::instrument(level = "trace", skip(self), fields(root = %self.root.display()))]
    async fn get(&self, key: &Key) -> TreeResult<Option<Value>> {
        let name = match key {
            Key::Default => return Ok(Some(Value::Tree(upgrade(&self.this, KIND)?))),
            Key::Name(name) => name.as_str(),
        };
        let bare = remove_trailing_slash(name);
        if bare.is_empty() {
            return Ok(Some(Value::Tree(upgrade(&self.this, KIND)?)));
        }
        if let Some(child) = self.cached_child(bare) {
            return Ok(Some(Value::Tree(child)));
        }

        let path = self.file_path(bare)?;
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(err) if is_missing(&err) => return Ok(None),
            Err(err) => return Err(TreeError::io(path, err)),
        };

        if metadata.is_dir() {
            return Ok(Some(Value::Tree(self.child(bare)?)));
        }
        let loader = self.config.loader_for(bare);
        if has_trailing_slash(name) && !loader.is_some_and(Loader::unpacks_to_tree) {
            // Only data files can be traversed into.
            return Ok(None);
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if is_missing(&err) => return Ok(None),
            Err(err) => return Err(TreeError::io(path, err)),
        };
        Ok(Some(match loader {
            Some(loader) => {
                let container: TreeRef = upgrade(&self.this, KIND)?;
                Value::Packed(Packed::new(bytes, loader, path.display().to_string(), Some(container)))
            }
            None => Value::Bytes(bytes),
        }))
    }

    #[tracing::instrument(level = "trace", skip(self), fields(root = %self.root.display()))]
    async fn keys(&self) -> TreeResult<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if is_missing(&err) => return Ok(Vec::new()),
            Err(err) => return Err(TreeError::io(&self.root, err)),
        };
        let mut keys = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => return Err(TreeError::io(&self.root, err)),
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.config.is_hidden(&name) {
                continue;
            }
            let is_dir = match entry.file_type().await {
                Ok(file_type) => file_type.is_dir(),
                Err(err) if is_missing(&err) => continue,
                Err(err) => return Err(TreeError::io(entry.path(), err)),
            };
            keys.push(slash_if(&name, is_dir));
        }
        sort_natural(&mut keys);
        Ok(keys)
    }

    async fn is_key_for_subtree(&self, key: &str) -> TreeResult<bool> {
        let path = self.file_path(remove_trailing_slash(key))?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_dir()),
            Err(err) if is_missing(&err) => Ok(false),
            Err(err) => Err(TreeError::io(path, err)),
        }
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
impl MutableTree for FileTree {
    #[tracing::instrument(level = "debug", skip(self, value), fields(root = %self.root.display()))]
    async fn set(&self, key: &str, value: Option<Value>) -> TreeResult<()> {
        let name = remove_trailing_slash(key);
        match value {
            None => self.delete(name).await?,
            Some(value) => self.write_value(name, value).await?,
        }
        self.on_change(name);
        Ok(())
    }
}

impl WatchTarget for FileTree {
    fn on_change(&self, name: &str) {
        FileTree::on_change(self, name);
    }
}

fn is_missing(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory)
}
