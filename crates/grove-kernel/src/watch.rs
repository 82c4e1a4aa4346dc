//! Shared file-system watcher.
//!
//! One [`FileWatcher`] multiplexes OS events to every file tree watching a
//! directory. Registrations hold weak handles: a tree that is dropped
//! without unwatching simply stops receiving events, and its registration
//! is pruned the next time an event arrives for its directory.
//!
//! Events are delivered synchronously on notify's event thread, so targets
//! must not block in [`WatchTarget::on_change`].

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::{TreeError, TreeResult};

/// Receives change notifications for one watched directory.
pub trait WatchTarget: Send + Sync {
    /// `name` is the changed entry's file name within the directory.
    fn on_change(&self, name: &str);
}

/// Identifies one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

struct Registration {
    id: WatchId,
    target: Weak<dyn WatchTarget>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    by_path: HashMap<PathBuf, Vec<Registration>>,
    /// Directories whose registrations were all pruned during dispatch; the
    /// OS watch is released on the next call from outside the event thread.
    stale: Vec<PathBuf>,
}

/// A shared, explicitly started watcher.
pub struct FileWatcher {
    registry: Arc<Mutex<Registry>>,
    /// Set by `start`, cleared by `stop`. The OS handle may be released
    /// while started, when the last registration goes away.
    started: AtomicBool,
    os: Mutex<Option<RecommendedWatcher>>,
}

impl Default for FileWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl FileWatcher {
    /// Create a stopped watcher.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            started: AtomicBool::new(false),
            os: Mutex::new(None),
        }
    }

    /// Start delivering events. Directories registered while stopped are
    /// watched now.
    pub fn start(&self) -> TreeResult<()> {
        self.started.store(true, Ordering::SeqCst);
        let mut os = lock(&self.os)?;
        if os.is_none() {
            *os = Some(self.os_watcher()?);
            tracing::debug!("file watcher started");
        }
        Ok(())
    }

    /// Stop delivering events. Registrations are kept for a later `start`.
    pub fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        if let Ok(mut os) = self.os.lock() {
            if os.take().is_some() {
                tracing::debug!("file watcher stopped");
            }
        }
    }

    /// True while an OS watcher is live.
    pub fn is_running(&self) -> bool {
        self.os.lock().map(|os| os.is_some()).unwrap_or(false)
    }

    /// Register `target` for changes in `dir`.
    #[tracing::instrument(level = "debug", skip(self, target), fields(dir = %dir.display()))]
    pub fn register(&self, dir: &Path, target: Weak<dyn WatchTarget>) -> TreeResult<WatchId> {
        let (id, first) = {
            let mut registry = lock(&self.registry)?;
            registry.next_id += 1;
            let id = WatchId(registry.next_id);
            let registrations = registry.by_path.entry(dir.to_path_buf()).or_default();
            let first = registrations.is_empty();
            registrations.push(Registration { id, target });
            registry.stale.retain(|stale| stale != dir);
            (id, first)
        };
        self.release_stale()?;
        if !self.started.load(Ordering::SeqCst) {
            return Ok(id);
        }
        let mut os = lock(&self.os)?;
        match os.as_mut() {
            Some(watcher) if first => watcher.watch(dir, RecursiveMode::NonRecursive)?,
            Some(_) => {}
            None => {
                // Released with the last registration; re-arm.
                *os = Some(self.os_watcher()?);
                tracing::debug!("file watcher restarted");
            }
        }
        Ok(id)
    }

    /// Remove a registration. The directory's OS watch is released with its
    /// last registration, and the OS watcher itself with the last directory.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn unregister(&self, id: WatchId) -> TreeResult<()> {
        let (emptied, none_left) = {
            let mut registry = lock(&self.registry)?;
            let mut emptied = None;
            for (path, registrations) in registry.by_path.iter_mut() {
                let before = registrations.len();
                registrations.retain(|registration| registration.id != id);
                if registrations.len() != before && registrations.is_empty() {
                    emptied = Some(path.clone());
                }
            }
            if let Some(path) = &emptied {
                registry.by_path.remove(path);
            }
            (emptied, registry.by_path.is_empty())
        };
        self.release_stale()?;
        if let Some(path) = emptied {
            let mut os = lock(&self.os)?;
            if let Some(watcher) = os.as_mut() {
                if let Err(err) = watcher.unwatch(&path) {
                    tracing::debug!(error = %err, path = %path.display(), "unwatch failed");
                }
            }
            if none_left {
                *os = None;
                tracing::debug!("last registration removed, file watcher stopped");
            }
        }
        Ok(())
    }

    /// Number of live registrations.
    pub fn registration_count(&self) -> usize {
        self.registry
            .lock()
            .map(|registry| registry.by_path.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// A new OS watcher covering every registered directory.
    fn os_watcher(&self) -> TreeResult<RecommendedWatcher> {
        let registry = Arc::downgrade(&self.registry);
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| match result {
            Ok(event) => {
                if let Some(registry) = registry.upgrade() {
                    dispatch(&registry, &event);
                }
            }
            Err(err) => tracing::warn!(error = %err, "file watcher error"),
        })?;
        for path in self.watched_paths()? {
            watcher.watch(&path, RecursiveMode::NonRecursive)?;
        }
        Ok(watcher)
    }

    fn watched_paths(&self) -> TreeResult<Vec<PathBuf>> {
        Ok(lock(&self.registry)?.by_path.keys().cloned().collect())
    }

    fn release_stale(&self) -> TreeResult<()> {
        let stale = std::mem::take(&mut lock(&self.registry)?.stale);
        if stale.is_empty() {
            return Ok(());
        }
        if let Some(watcher) = lock(&self.os)?.as_mut() {
            for path in stale {
                if let Err(err) = watcher.unwatch(&path) {
                    tracing::debug!(error = %err, path = %path.display(), "unwatch failed");
                }
            }
        }
        Ok(())
    }
}

/// Deliver one OS event.
///
/// Each affected (target, name) pair is notified once per event, however
/// many paths in the event map to it. Dead handles are pruned.
fn dispatch(registry: &Mutex<Registry>, event: &Event) {
    if matches!(event.kind, EventKind::Access(_)) {
        return;
    }

    let mut deliveries: Vec<(Arc<dyn WatchTarget>, String)> = Vec::new();
    {
        let Ok(mut registry) = registry.lock() else {
            return;
        };
        let mut seen = HashSet::new();
        let mut emptied = Vec::new();
        for path in &event.paths {
            let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
                continue;
            };
            let name = name.to_string_lossy().into_owned();
            let Some(registrations) = registry.by_path.get_mut(dir) else {
                continue;
            };
            registrations.retain(|registration| registration.target.strong_count() > 0);
            if registrations.is_empty() {
                emptied.push(dir.to_path_buf());
                continue;
            }
            for registration in registrations.iter() {
                if !seen.insert((registration.id, name.clone())) {
                    continue;
                }
                if let Some(target) = registration.target.upgrade() {
                    deliveries.push((target, name.clone()));
                }
            }
        }
        for dir in emptied {
            registry.by_path.remove(&dir);
            registry.stale.push(dir);
        }
    }

    for (target, name) in deliveries {
        tracing::trace!(%name, "change");
        target.on_change(&name);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> TreeResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| TreeError::Eval("watcher lock poisoned".into()))
}
