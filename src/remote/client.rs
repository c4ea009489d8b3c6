//! Upsert-style client for the remote catalog API.
//!
//! The remote system exposes three endpoint families (see the deployment
//! contract): an item collection supporting create/update/query-by-sku,
//! hierarchical taxonomy terms supporting create/list-by-slug, and a
//! media store supporting binary upload and checksum-tagged query.
//!
//! Every public method is one logical unit of remote work: each HTTP
//! request it issues passes through the shared [`RateLimiter`] and the
//! [`RetryExecutor`], and nothing here retries beyond that. Lookups are
//! deliberately defensive - `find_by_sku` before create and
//! `find_media_by_checksum` before upload are what make the pipeline
//! survive ledger loss without duplicating remote state.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use url::Url;

use crate::manifest::Manifest;

use super::error::RemoteError;
use super::rate_limiter::RateLimiter;
use super::retry::RetryExecutor;

/// Item collection endpoint, relative to the base URL.
const ITEMS_PATH: &str = "api/v1/items";

/// Taxonomy term endpoint template; `{}` is the taxonomy name.
const TERMS_PATH: &str = "api/v1/taxonomies";

/// Media endpoint, relative to the base URL.
const MEDIA_PATH: &str = "api/v1/media";

/// Header carrying the content digest of an uploaded asset. The server
/// stores it as queryable metadata, which is what makes checksum-based
/// dedup lookups possible.
pub const CHECKSUM_HEADER: &str = "x-content-checksum";

/// Connection settings for the remote API.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL of the deployment, e.g. `https://cms.example.com/`.
    pub base_url: Url,
    /// Bearer credential, provisioned out-of-band.
    pub token: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// Everything the client needs to build one item upsert payload.
#[derive(Debug)]
pub struct ItemUpsert<'a> {
    /// The manifest being applied.
    pub manifest: &'a Manifest,
    /// Canonical manifest checksum, stored as remote metadata.
    pub checksum: &'a str,
    /// Resolved taxonomy term ids, keyed by taxonomy name.
    pub term_ids: BTreeMap<String, Vec<u64>>,
    /// Remote id of the featured image, when any.
    pub featured_media: Option<u64>,
    /// Remote ids of the gallery images, in manifest order.
    pub gallery: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct RemoteItem {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RemoteTerm {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RemoteMedia {
    id: u64,
}

#[derive(Debug, Serialize)]
struct ItemPayload<'a> {
    title: &'a str,
    slug: String,
    status: &'a str,
    meta: ItemMeta<'a>,
    taxonomies: &'a BTreeMap<String, Vec<u64>>,
}

#[derive(Debug, Serialize)]
struct ItemMeta<'a> {
    sku: &'a str,
    manifest_checksum: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    short_description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    technical_description: Option<&'a str>,
    /// Color list as a compact comma-separated encoding.
    #[serde(skip_serializing_if = "Option::is_none")]
    colors: Option<String>,
    gallery: &'a [u64],
    #[serde(skip_serializing_if = "Option::is_none")]
    featured_media: Option<u64>,
}

/// Authenticated client for the remote catalog API.
///
/// Cheap to share behind an `Arc`; the underlying reqwest client pools
/// connections.
#[derive(Debug)]
pub struct RemoteClient {
    http: reqwest::Client,
    config: RemoteConfig,
    limiter: Arc<RateLimiter>,
    retry: RetryExecutor,
}

impl RemoteClient {
    /// Creates a client over the given connection settings.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(config: RemoteConfig, limiter: Arc<RateLimiter>, retry: RetryExecutor) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self {
            http,
            config,
            limiter,
            retry,
        }
    }

    /// Finds an item by sku via metadata query.
    ///
    /// Used both for idempotence verification before create and for
    /// ledger recovery after local state loss.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] on transport failure.
    #[instrument(skip(self))]
    pub async fn find_by_sku(&self, sku: &str) -> Result<Option<u64>, RemoteError> {
        let url = self.endpoint(ITEMS_PATH)?;
        let query = [("sku", sku)];
        let items: Vec<RemoteItem> = self
            .retry
            .execute("find_by_sku", || self.get_json(url.clone(), &query))
            .await?;
        Ok(items.first().map(|item| item.id))
    }

    /// Creates or updates an item: POST to the collection when
    /// `existing_id` is absent, PUT to the item otherwise. Returns the
    /// remote item id.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] on transport failure or rejection.
    #[instrument(skip(self, upsert), fields(sku = %upsert.manifest.sku))]
    pub async fn upsert_item(
        &self,
        upsert: &ItemUpsert<'_>,
        existing_id: Option<u64>,
    ) -> Result<u64, RemoteError> {
        let payload = build_item_payload(upsert);

        let item: RemoteItem = match existing_id {
            Some(id) => {
                let url = self.endpoint(&format!("{ITEMS_PATH}/{id}"))?;
                self.retry
                    .execute("update_item", || self.put_json(url.clone(), &payload))
                    .await?
            }
            None => {
                let url = self.endpoint(ITEMS_PATH)?;
                self.retry
                    .execute("create_item", || self.post_json(url.clone(), &payload))
                    .await?
            }
        };

        debug!(sku = %upsert.manifest.sku, remote_id = item.id, "item upserted");
        Ok(item.id)
    }

    /// Resolves taxonomy term slugs to remote ids, creating missing
    /// terms. Idempotent: existing slugs resolve to their current id.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] on transport failure.
    #[instrument(skip(self, slugs), fields(count = slugs.len()))]
    pub async fn ensure_taxonomy_terms(
        &self,
        taxonomy: &str,
        slugs: &[String],
    ) -> Result<Vec<u64>, RemoteError> {
        let url = self.endpoint(&format!("{TERMS_PATH}/{taxonomy}/terms"))?;
        let mut ids = Vec::with_capacity(slugs.len());

        for slug in slugs {
            let query = [("slug", slug.as_str())];
            let found: Vec<RemoteTerm> = self
                .retry
                .execute("find_term", || self.get_json(url.clone(), &query))
                .await?;

            let id = match found.first() {
                Some(term) => term.id,
                None => {
                    let body = serde_json::json!({ "slug": slug });
                    let created: RemoteTerm = self
                        .retry
                        .execute("create_term", || self.post_json(url.clone(), &body))
                        .await?;
                    info!(taxonomy, slug = %slug, id = created.id, "taxonomy term created");
                    created.id
                }
            };
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        Ok(ids)
    }

    /// Finds a media asset by its content digest.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] on transport failure.
    #[instrument(skip(self))]
    pub async fn find_media_by_checksum(
        &self,
        checksum: &str,
    ) -> Result<Option<u64>, RemoteError> {
        let url = self.endpoint(MEDIA_PATH)?;
        let query = [("checksum", checksum)];
        let found: Vec<RemoteMedia> = self
            .retry
            .execute("find_media", || self.get_json(url.clone(), &query))
            .await?;
        Ok(found.first().map(|m| m.id))
    }

    /// Uploads a media file, tagging it with its content digest so
    /// future runs can find it by checksum.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] on transport failure or rejection, or
    /// when the file cannot be read from disk.
    #[instrument(skip(self), fields(file = %file.display()))]
    pub async fn upload_media(&self, file: &Path, checksum: &str) -> Result<u64, RemoteError> {
        let url = self.endpoint(MEDIA_PATH)?;
        let filename = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        let content_type = guess_content_type(&filename);

        let bytes = tokio::fs::read(file).await.map_err(|e| RemoteError::Decode {
            url: url.to_string(),
            detail: format!("cannot read media file {}: {e}", file.display()),
        })?;

        let media: RemoteMedia = self
            .retry
            .execute("upload_media", || {
                self.post_binary(url.clone(), &bytes, &filename, content_type, checksum)
            })
            .await?;

        info!(file = %file.display(), remote_id = media.id, "media uploaded");
        Ok(media.id)
    }

    /// Deduplicated upload: queries the media store by checksum first
    /// and only uploads when no asset with that digest exists.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] on transport failure.
    pub async fn upload_media_dedup(
        &self,
        file: &Path,
        checksum: &str,
    ) -> Result<u64, RemoteError> {
        if let Some(id) = self.find_media_by_checksum(checksum).await? {
            debug!(checksum, remote_id = id, "media already present remotely");
            return Ok(id);
        }
        self.upload_media(file, checksum).await
    }

    /// Connectivity probe: an authenticated query against the item
    /// collection. Used by the `health` command; performs no mutation.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the deployment is unreachable or
    /// the credential is rejected.
    pub async fn health_check(&self) -> Result<(), RemoteError> {
        let url = self.endpoint(ITEMS_PATH)?;
        let query = [("sku", "__health__")];
        let _items: Vec<RemoteItem> = self
            .retry
            .execute("health_check", || self.get_json(url.clone(), &query))
            .await?;
        Ok(())
    }

    // ---- single-attempt request primitives ----

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, &str)],
    ) -> Result<T, RemoteError> {
        self.limiter.acquire().await;
        let response = self
            .http
            .get(url.clone())
            .bearer_auth(&self.config.token)
            .query(query)
            .send()
            .await
            .map_err(|e| RemoteError::from_reqwest(url.as_str(), e))?;
        decode(url, response).await
    }

    async fn post_json<T: serde::de::DeserializeOwned, B: Serialize>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<T, RemoteError> {
        self.limiter.acquire().await;
        let response = self
            .http
            .post(url.clone())
            .bearer_auth(&self.config.token)
            .json(body)
            .send()
            .await
            .map_err(|e| RemoteError::from_reqwest(url.as_str(), e))?;
        decode(url, response).await
    }

    async fn put_json<T: serde::de::DeserializeOwned, B: Serialize>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<T, RemoteError> {
        self.limiter.acquire().await;
        let response = self
            .http
            .put(url.clone())
            .bearer_auth(&self.config.token)
            .json(body)
            .send()
            .await
            .map_err(|e| RemoteError::from_reqwest(url.as_str(), e))?;
        decode(url, response).await
    }

    async fn post_binary<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        bytes: &[u8],
        filename: &str,
        content_type: &'static str,
        checksum: &str,
    ) -> Result<T, RemoteError> {
        self.limiter.acquire().await;
        let response = self
            .http
            .post(url.clone())
            .bearer_auth(&self.config.token)
            .header(
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            )
            .header(CONTENT_TYPE, content_type)
            .header(CHECKSUM_HEADER, checksum)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| RemoteError::from_reqwest(url.as_str(), e))?;
        decode(url, response).await
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        self.config
            .base_url
            .join(path)
            .map_err(|e| RemoteError::Decode {
                url: self.config.base_url.to_string(),
                detail: format!("cannot build endpoint {path}: {e}"),
            })
    }
}

/// Checks the response status and decodes the JSON body.
async fn decode<T: serde::de::DeserializeOwned>(
    url: Url,
    response: reqwest::Response,
) -> Result<T, RemoteError> {
    let status = response.status();
    if !status.is_success() {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        return Err(RemoteError::from_status(
            url.as_str(),
            status.as_u16(),
            retry_after,
        ));
    }

    response.json().await.map_err(|e| RemoteError::Decode {
        url: url.to_string(),
        detail: e.to_string(),
    })
}

/// Builds the wire payload for one item upsert.
fn build_item_payload<'a>(upsert: &'a ItemUpsert<'_>) -> ItemPayload<'a> {
    let manifest = upsert.manifest;
    let colors = manifest
        .attributes
        .get("available_colors")
        .filter(|c| !c.is_empty())
        .map(|c| c.join(","));

    ItemPayload {
        title: &manifest.product.title,
        slug: manifest.effective_slug(),
        status: manifest.product.status.as_str(),
        meta: ItemMeta {
            sku: &manifest.sku,
            manifest_checksum: upsert.checksum,
            short_description: manifest.descriptions.short.as_deref(),
            technical_description: manifest.descriptions.technical.as_deref(),
            colors,
            gallery: &upsert.gallery,
            featured_media: upsert.featured_media,
        },
        taxonomies: &upsert.term_ids,
    }
}

/// Guesses a content type from a file name extension.
fn guess_content_type(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}
