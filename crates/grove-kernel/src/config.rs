//! Configuration shared by backends and the formula engine.
//!
//! A `GroveConfig` is built once by the embedding program and handed to
//! trees as an `Arc`. Nothing in the crate reads configuration from global
//! state or the environment.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tree::loaders::Loader;

/// Default request timeout for remote trees.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on formula implication passes.
pub const DEFAULT_MAX_IMPLICATION_PASSES: usize = 64;

/// How a formula tree orders its derived keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyOrder {
    /// Human ordering: `file9` before `file10`.
    #[default]
    Natural,
    /// Raw keys first in the order the inner tree reports them, then implied
    /// keys in the order they were discovered.
    Declaration,
}

/// Options for grove trees.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroveConfig {
    /// File names never listed by a file tree.
    pub hidden_names: Vec<String>,

    /// Extension (including the dot) to loader, checked in order.
    pub loaders: Vec<(String, Loader)>,

    /// Key ordering for formula trees.
    pub key_order: KeyOrder,

    /// Upper bound on implication passes before the key set is accepted as is.
    pub max_implication_passes: usize,

    /// Timeout applied to each remote request.
    pub http_timeout: Duration,
}

impl Default for GroveConfig {
    fn default() -> Self {
        let loaders = [
            (".txt", Loader::Text),
            (".md", Loader::Text),
            (".html", Loader::Text),
            (".htm", Loader::Text),
            (".css", Loader::Text),
            (".js", Loader::Text),
            (".xhtml", Loader::Text),
            (".json", Loader::Json),
            (".yaml", Loader::Yaml),
            (".yml", Loader::Yaml),
            (".ori", Loader::Template),
        ];
        Self {
            hidden_names: vec![".DS_Store".to_string()],
            loaders: loaders
                .into_iter()
                .map(|(ext, loader)| (ext.to_string(), loader))
                .collect(),
            key_order: KeyOrder::default(),
            max_implication_passes: DEFAULT_MAX_IMPLICATION_PASSES,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl GroveConfig {
    /// Wrap in an `Arc` for sharing between trees.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Add a hidden file name.
    pub fn with_hidden_name(mut self, name: impl Into<String>) -> Self {
        self.hidden_names.push(name.into());
        self
    }

    /// Register (or replace) the loader for an extension.
    pub fn with_loader(mut self, extension: impl Into<String>, loader: Loader) -> Self {
        let extension = normalize_extension(&extension.into());
        self.loaders.retain(|(ext, _)| *ext != extension);
        self.loaders.push((extension, loader));
        self
    }

    /// Remove every loader; files are then returned as raw bytes.
    pub fn without_loaders(mut self) -> Self {
        self.loaders.clear();
        self
    }

    pub fn with_key_order(mut self, order: KeyOrder) -> Self {
        self.key_order = order;
        self
    }

    pub fn with_max_implication_passes(mut self, passes: usize) -> Self {
        self.max_implication_passes = passes;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// True if `name` should be left out of directory listings.
    pub fn is_hidden(&self, name: &str) -> bool {
        self.hidden_names.iter().any(|hidden| hidden == name)
    }

    /// The loader registered for `name`'s extension, if any.
    pub fn loader_for(&self, name: &str) -> Option<Loader> {
        let dot = name.rfind('.')?;
        let extension = name[dot..].to_ascii_lowercase();
        self.loaders
            .iter()
            .find(|(ext, _)| *ext == extension)
            .map(|(_, loader)| *loader)
    }
}

fn normalize_extension(extension: &str) -> String {
    let lower = extension.to_ascii_lowercase();
    if lower.starts_with('.') {
        lower
    } else {
        format!(".{lower}")
    }
}
