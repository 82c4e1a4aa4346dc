//! Tree over an HTTP site.
//!
//! A site that serves a `.keys.json` manifest at its base URL is
//! *explorable*: it lists its keys and exposes URLs ending in `/` as
//! subtrees. Other sites can still be read key by key; they just can't be
//! listed.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use grove_types::{Key, add_trailing_slash, has_trailing_slash, media_type_is_text};
use reqwest::{Client, StatusCode, Url};
use tokio::sync::OnceCell;

use super::{ParentCell, Tree, TreeRef, adopt};
use crate::config::GroveConfig;
use crate::error::{TreeError, TreeResult};
use crate::value::Value;

const KIND: &str = "SiteTree";

/// Name of the manifest listing a site's keys.
pub const KEYS_MANIFEST: &str = ".keys.json";

/// A read-only tree over HTTP(S) resources under a base URL.
pub struct SiteTree {
    href: Url,
    client: Client,
    manifest: OnceCell<Option<Vec<String>>>,
    this: Weak<SiteTree>,
    parent: ParentCell,
}

impl SiteTree {
    /// Wrap the site at `href`. A trailing slash is added if missing.
    pub fn new(href: &str, config: &GroveConfig) -> TreeResult<Arc<Self>> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|source| TreeError::Fetch {
                url: href.to_string(),
                source,
            })?;
        Self::with_client(href, client)
    }

    /// Wrap the site at `href`, sharing an existing client.
    pub fn with_client(href: &str, client: Client) -> TreeResult<Arc<Self>> {
        let normalized = add_trailing_slash(href);
        let href = Url::parse(&normalized).map_err(|err| TreeError::InvalidUrl {
            url: normalized.clone(),
            reason: err.to_string(),
        })?;
        Ok(Arc::new_cyclic(|this| SiteTree {
            href,
            client,
            manifest: OnceCell::new(),
            this: this.clone(),
            parent: ParentCell::default(),
        }))
    }

    pub fn href(&self) -> &str {
        self.href.as_str()
    }

    /// The site's manifest, fetched at most once.
    ///
    /// `None` means the site isn't explorable: the manifest is missing, the
    /// response wasn't OK, or the body wasn't a JSON list of strings.
    pub async fn manifest(&self) -> TreeResult<Option<&[String]>> {
        let manifest = self
            .manifest
            .get_or_try_init(|| self.fetch_manifest())
            .await?;
        Ok(manifest.as_deref())
    }

    async fn is_explorable(&self) -> TreeResult<bool> {
        Ok(self.manifest().await?.is_some())
    }

    #[tracing::instrument(level = "debug", skip(self), fields(href = %self.href))]
    async fn fetch_manifest(&self) -> TreeResult<Option<Vec<String>>> {
        let url = self.join(KEYS_MANIFEST)?;
        let response = self.send(&url).await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let text = response.text().await.map_err(|source| TreeError::Fetch {
            url: url.to_string(),
            source,
        })?;
        // A 200 with a non-JSON body is usually a not-found page served with
        // the wrong status.
        Ok(serde_json::from_str::<Vec<String>>(&text).ok())
    }

    fn join(&self, key: &str) -> TreeResult<Url> {
        self.href.join(key).map_err(|err| TreeError::InvalidUrl {
            url: format!("{}{key}", self.href),
            reason: err.to_string(),
        })
    }

    async fn send(&self, url: &Url) -> TreeResult<reqwest::Response> {
        tracing::trace!(%url, "fetch");
        self.client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| TreeError::Fetch {
                url: url.to_string(),
                source,
            })
    }

    fn subtree(&self, url: &Url) -> TreeResult<Arc<SiteTree>> {
        let tree = SiteTree::with_client(url.as_str(), self.client.clone())?;
        Ok(tree)
    }
}

#[async_trait]
impl Tree for SiteTree {
    #[tracing::instrument(level = "debug", skip(self), fields(href = %self.href))]
    async fn get(&self, key: &Key) -> TreeResult<Option<Value>> {
        let Some(name) = key.name() else {
            return Err(TreeError::NullKey { tree: KIND });
        };

        let route = if name.is_empty() && self.is_explorable().await? {
            "index.html"
        } else {
            name
        };
        let url = self.join(route)?;

        if url.as_str().ends_with('/') && self.is_explorable().await? {
            let value = Value::Tree(self.subtree(&url)?);
            adopt(&value, self.this.clone());
            return Ok(Some(value));
        }

        let response = self.send(&url).await?;
        if response.status() != StatusCode::OK {
            tracing::debug!(status = %response.status(), %url, "no value");
            return Ok(None);
        }

        let final_url = response.url().clone();
        if final_url != url && final_url.as_str().ends_with('/') && self.is_explorable().await? {
            let value = Value::Tree(self.subtree(&final_url)?);
            adopt(&value, self.this.clone());
            return Ok(Some(value));
        }

        let is_text = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(media_type_is_text);
        let fetch_error = |source| TreeError::Fetch {
            url: final_url.to_string(),
            source,
        };
        if is_text {
            Ok(Some(Value::String(response.text().await.map_err(fetch_error)?)))
        } else {
            let bytes = response.bytes().await.map_err(fetch_error)?;
            Ok(Some(Value::Bytes(bytes.to_vec())))
        }
    }

    async fn keys(&self) -> TreeResult<Vec<String>> {
        Ok(self.manifest().await?.map(<[String]>::to_vec).unwrap_or_default())
    }

    async fn is_key_for_subtree(&self, key: &str) -> TreeResult<bool> {
        match self.manifest().await? {
            Some(keys) => {
                let with_slash = add_trailing_slash(key);
                Ok(keys.iter().any(|k| *k == with_slash))
            }
            None if has_trailing_slash(key) => Ok(true),
            None => Ok(self
                .get(&Key::from(key))
                .await?
                .as_ref()
                .is_some_and(Value::is_treelike)),
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
}
