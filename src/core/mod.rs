use crate::config::{self, Config};
use crate::error::{Error, Result};
use crate::listing;
use crate::s3::types::{ListRequest, SelectRequest};
use crate::s3::S3Client;
use crate::select::{self, SelectSummary};
use crate::store::ObjectStore;
use anyhow::Context;
use bytes::Bytes;
use futures::Stream;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tracing::info;

/// Storage client handle shared by every operation
///
/// The store is created once and shared. Clones share the same underlying
/// HTTP connection pool and hold no mutable state, so concurrent callers
/// need no locking.
#[derive(Clone)]
pub struct Core {
    pub config: Arc<Config>,
    store: Arc<dyn ObjectStore>,
}

impl Core {
    /// Build a handle from the active profile of `config`
    pub fn new(config: Config) -> Result<Self> {
        let profile = config
            .active_profile()
            .ok_or_else(|| Error::Config("No profile found in configuration".to_string()))?;

        profile
            .validate()
            .context("Invalid profile")
            .map_err(Error::config)?;

        let client = S3Client::new(profile, &config.transport)
            .map_err(|e| Error::Config(e.to_string()))?;

        info!(
            endpoint = client.endpoint(),
            region = client.region(),
            "storage client ready"
        );

        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(client),
        })
    }

    /// Build a handle for `region` with credentials from the environment
    pub fn connect(region: &str) -> Result<Self> {
        let mut config = config::load_from_env()
            .context("Failed to resolve credentials")
            .map_err(Error::config)?;
        config.set_region(region).map_err(Error::config)?;
        Self::new(config)
    }

    /// Handle over an existing store
    pub fn with_store(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            config: Arc::new(Config::new()),
            store,
        }
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.store)
    }

    pub async fn list_buckets(&self) -> Result<Vec<String>> {
        listing::list_buckets(self.store.as_ref()).await
    }

    pub async fn list_directories(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        listing::list_directories(self.store.as_ref(), bucket, prefix).await
    }

    pub async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        listing::list_keys(self.store.as_ref(), bucket, prefix).await
    }

    /// Entries of an arbitrary listing request, e.g. one with a page size
    pub async fn list_entries(&self, request: ListRequest) -> Result<Vec<String>> {
        listing::list_entries(self.store.as_ref(), request).await
    }

    /// Stream the record payloads of `query` run against a JSON Lines object.
    ///
    /// Compression is inferred from the key suffix.
    pub fn run_select(
        &self,
        bucket: &str,
        key: &str,
        query: &str,
    ) -> impl Stream<Item = Result<Bytes>> + Send + 'static {
        select::run_select(self.store(), SelectRequest::json_lines(bucket, key, query))
    }

    /// Like [`Core::run_select`], writing payloads to `writer` as they arrive
    pub async fn select_to_writer<W>(
        &self,
        bucket: &str,
        key: &str,
        query: &str,
        writer: &mut W,
    ) -> Result<SelectSummary>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        select::select_to_writer(
            self.store(),
            SelectRequest::json_lines(bucket, key, query),
            writer,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;
    use crate::s3::types::{BucketInfo, ListPage};
    use crate::store::mock::MockObjectStore;

    fn config_with(profile: Profile) -> Config {
        let mut config = Config::new();
        config.profiles.insert("test".to_string(), profile);
        config
    }

    fn profile() -> Profile {
        Profile {
            endpoint: Some("http://localhost:9000".to_string()),
            access_key: "key".to_string(),
            secret_key: "secret".to_string(),
            session_token: None,
            region: "us-east-1".to_string(),
        }
    }

    #[test]
    fn test_new_builds_handle() {
        let core = Core::new(config_with(profile())).unwrap();
        assert_eq!(core.config.profiles.len(), 1);
    }

    #[test]
    fn test_new_without_profile() {
        let err = Core::new(Config::new()).err().unwrap();
        assert!(err.is_config());
    }

    #[test]
    fn test_new_rejects_empty_access_key() {
        let mut profile = profile();
        profile.access_key = String::new();

        let err = Core::new(config_with(profile)).err().unwrap();
        assert!(err.is_config());
        assert!(err.to_string().contains("access key"));
    }

    #[test]
    fn test_new_rejects_bad_region() {
        let mut profile = profile();
        profile.region = "Not A Region".to_string();

        let err = Core::new(config_with(profile)).err().unwrap();
        assert!(err.is_config());
        assert!(err.to_string().contains("invalid region"));
    }

    #[tokio::test]
    async fn test_clones_share_store() {
        let mock = Arc::new(
            MockObjectStore::new()
                .with_buckets(vec![BucketInfo::named("a")])
                .with_page(ListPage::with_prefixes(["logs/"])),
        );
        let core = Core::with_store(mock.clone());
        let clone = core.clone();

        assert_eq!(core.list_buckets().await.unwrap(), vec!["a"]);
        assert_eq!(clone.list_directories("a", "").await.unwrap(), vec!["logs/"]);
        assert_eq!(mock.list_calls().len(), 1);
    }
}
