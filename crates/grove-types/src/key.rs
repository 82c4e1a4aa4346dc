//! Tree keys and the trailing-slash convention.
//!
//! A key ending in `/` denotes a subtree. The slash-bearing and bare forms of
//! a name are the same logical key for existence checks, but a tree may hold a
//! distinct value under each form, so lookups try both.

use std::collections::HashMap;
use std::fmt;

/// The subtree marker appended to keys.
pub const SLASH: char = '/';

/// A key passed to `Tree::get`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// The default-value marker: "the value of this tree itself".
    ///
    /// Most trees reject it as a reference error; a directory tree answers
    /// with itself, so `folder/` and `folder` resolve the same way.
    Default,
    /// A named key, possibly carrying a trailing slash.
    Name(String),
}

impl Key {
    /// The key's name, or `None` for the default marker.
    pub fn name(&self) -> Option<&str> {
        match self {
            Key::Default => None,
            Key::Name(name) => Some(name),
        }
    }

    /// True if this is a named key ending in a slash.
    pub fn has_trailing_slash(&self) -> bool {
        self.name().is_some_and(has_trailing_slash)
    }

    /// The same key with a trailing slash.
    pub fn with_slash(&self) -> Key {
        match self {
            Key::Default => Key::Default,
            Key::Name(name) => Key::Name(add_trailing_slash(name)),
        }
    }

    /// The same key without a trailing slash.
    pub fn without_slash(&self) -> Key {
        match self {
            Key::Default => Key::Default,
            Key::Name(name) => Key::Name(remove_trailing_slash(name).to_string()),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(name)
    }
}

impl From<&String> for Key {
    fn from(name: &String) -> Self {
        Key::Name(name.clone())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Default => write!(f, "<default>"),
            Key::Name(name) => write!(f, "{name}"),
        }
    }
}

/// True if `key` ends with the subtree marker.
pub fn has_trailing_slash(key: &str) -> bool {
    key.ends_with(SLASH)
}

/// Append a trailing slash unless one is already present.
pub fn add_trailing_slash(key: &str) -> String {
    if has_trailing_slash(key) {
        key.to_string()
    } else {
        format!("{key}{SLASH}")
    }
}

/// Strip a single trailing slash, if present.
pub fn remove_trailing_slash(key: &str) -> &str {
    key.strip_suffix(SLASH).unwrap_or(key)
}

/// Add or remove the trailing slash to produce the alternate form.
pub fn toggle_trailing_slash(key: &str) -> String {
    if has_trailing_slash(key) {
        remove_trailing_slash(key).to_string()
    } else {
        add_trailing_slash(key)
    }
}

/// Tag `key` with a trailing slash when `is_subtree` holds.
pub fn slash_if(key: &str, is_subtree: bool) -> String {
    if is_subtree {
        add_trailing_slash(key)
    } else {
        key.to_string()
    }
}

/// Merge key lists into one, each logical name at most once.
///
/// Names keep the position of their first appearance. A name listed bare by
/// one source and with a slash by another comes out with the slash.
pub fn union_keys<I, K>(lists: I) -> Vec<String>
where
    I: IntoIterator<Item = K>,
    K: IntoIterator<Item = String>,
{
    let mut keys: Vec<String> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for key in lists.into_iter().flatten() {
        let bare = remove_trailing_slash(&key).to_string();
        match positions.get(&bare) {
            Some(&index) => {
                if has_trailing_slash(&key) {
                    keys[index] = key;
                }
            }
            None => {
                positions.insert(bare, keys.len());
                keys.push(key);
            }
        }
    }
    keys
}

/// Split a slash-separated path into traversal keys.
///
/// Every segment except the last keeps its trailing slash, since it must
/// name a subtree for the traversal to continue: `a/b/c` yields `a/`, `b/`,
/// `c`. A path ending in a slash keeps the slash on its last segment.
/// Empty segments are dropped.
pub fn keys_from_path(path: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut rest = path;
    while !rest.is_empty() {
        match rest.find(SLASH) {
            Some(0) => rest = &rest[1..],
            Some(idx) => {
                keys.push(rest[..=idx].to_string());
                rest = &rest[idx + 1..];
            }
            None => {
                keys.push(rest.to_string());
                rest = "";
            }
        }
    }
    keys
}
