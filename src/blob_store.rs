use std::collections::BTreeMap;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use aws_sdk_s3::{Client as S3Client, primitives::ByteStream};
use clap::{Args, ValueEnum};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// String-keyed blob storage with prefix listing.
/// One instance covers one namespace, keys are relative to it.
#[allow(clippy::indexing_slicing)] // For automock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_json(&self, key: &str, value: &Value) -> Result<()>;

    /// Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Keys starting with `prefix`. Order is backend defined.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// Process local map. Nothing survives a restart.
    #[default]
    Memory,
    /// AWS S3 bucket.
    S3,
}

#[derive(Debug, Clone, Args)]
pub struct StoreConfig {
    /// Backend for subscriptions and Slack installations.
    #[arg(env, long, default_value = "memory")]
    pub store_backend: StoreBackend,
    /// S3 bucket name, required for the s3 backend.
    #[arg(env, long)]
    pub store_bucket: Option<String>,
    /// Object key prefix put in front of every namespace.
    #[arg(env, long, default_value = "")]
    pub store_key_prefix: String,
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn set_json(&self, key: &str, value: &Value) -> Result<()> {
        let body = serde_json::to_string(value)?;
        self.blobs.write().await.insert(key.to_owned(), body);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blobs.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let blobs = self.blobs.read().await;
        Ok(blobs
            .range(prefix.to_owned()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
    // Always ends with `/`.
    namespace: String,
}

impl S3BlobStore {
    pub async fn from_env(config: &StoreConfig, namespace: &str) -> Result<Self> {
        let bucket = config
            .store_bucket
            .clone()
            .with_context(|| "--store-bucket is required for the s3 store backend")?;
        let sdk_config = aws_config::load_from_env().await;
        Ok(Self::new(
            S3Client::new(&sdk_config),
            bucket,
            &config.store_key_prefix,
            namespace,
        ))
    }

    pub fn new(client: S3Client, bucket: String, key_prefix: &str, namespace: &str) -> Self {
        Self {
            client,
            bucket,
            namespace: object_namespace(key_prefix, namespace),
        }
    }

    fn object_key(&self, key: &str) -> String {
        format!("{}{key}", self.namespace)
    }
}

fn object_namespace(key_prefix: &str, namespace: &str) -> String {
    let key_prefix = key_prefix.trim_matches('/');
    if key_prefix.is_empty() {
        format!("{namespace}/")
    } else {
        format!("{key_prefix}/{namespace}/")
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let object_key = self.object_key(key);
        let out = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
        {
            Ok(out) => out,
            Err(e) => {
                let e = e.into_service_error();
                if e.is_no_such_key() {
                    debug!("blob not found");
                    return Ok(None);
                }
                return Err(e).with_context(|| format!("getting s3 object failed: {object_key}"));
            }
        };
        let bytes = out
            .body
            .collect()
            .await
            .with_context(|| format!("reading s3 object failed: {object_key}"))?
            .into_bytes();
        Ok(Some(String::from_utf8(bytes.to_vec())?))
    }

    #[instrument(skip(self, value), fields(bucket = %self.bucket))]
    async fn set_json(&self, key: &str, value: &Value) -> Result<()> {
        let object_key = self.object_key(key);
        let body = serde_json::to_vec(value)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("putting s3 object failed: {object_key}"))?;
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn delete(&self, key: &str) -> Result<()> {
        let object_key = self.object_key(key);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .with_context(|| format!("deleting s3 object failed: {object_key}"))?;
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let object_prefix = self.object_key(prefix);
        let mut keys = Vec::new();
        let mut continuation_token = None;
        loop {
            let out = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&object_prefix)
                .set_continuation_token(continuation_token)
                .send()
                .await
                .with_context(|| format!("listing s3 objects failed: prefix={object_prefix}"))?;
            keys.extend(
                out.contents()
                    .iter()
                    .filter_map(|o| o.key())
                    .filter_map(|k| k.strip_prefix(self.namespace.as_str()))
                    .map(ToOwned::to_owned),
            );
            match out.next_continuation_token() {
                Some(token) if out.is_truncated().unwrap_or_default() => {
                    continuation_token = Some(token.to_owned());
                }
                _ => break,
            }
        }
        debug!(count = keys.len(), "listed blobs");
        Ok(keys)
    }
}
