//! Cosmos-style REST binding.
//!
//! Auth flow:
//!   1. The account master key (base64) is decoded once at construction.
//!   2. Each request signs `{verb}\n{resource_type}\n{resource_link}\n{date}\n\n`
//!      (verb and date lowercased) with HMAC-SHA256.
//!   3. The base64 signature travels url-encoded in the Authorization header
//!      as `type=master&ver=1.0&sig=...`.
//!
//! Point reads GET `dbs/{db}/colls/{coll}/docs/{id}`; upserts POST the
//! collection's `docs` resource with the is-upsert header set.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, warn};

use fathom_core::config::StoreConfig;

use crate::error::StoreError;
use crate::DocumentStore;

type HmacSha256 = Hmac<Sha256>;

const API_VERSION: &str = "2018-12-31";

pub struct CosmosStore {
    client: reqwest::Client,
    endpoint: String,
    database: String,
    key: Vec<u8>,
}

impl CosmosStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let key = BASE64
            .decode(config.key.trim())
            .map_err(|e| StoreError::Credentials(format!("master key is not base64: {e}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            database: config.database.clone(),
            key,
        })
    }

    fn collection_link(&self, container: &str) -> String {
        format!("dbs/{}/colls/{}", self.database, container)
    }

    /// Authorization header value for one request.
    fn auth_header(&self, verb: &str, resource_type: &str, resource_link: &str, date: &str) -> String {
        let payload = format!(
            "{}\n{}\n{}\n{}\n\n",
            verb.to_lowercase(),
            resource_type,
            resource_link,
            date.to_lowercase()
        );
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(payload.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());
        format!(
            "type%3Dmaster%26ver%3D1.0%26sig%3D{}",
            urlencoding::encode(&signature)
        )
    }

    fn rfc1123_now() -> String {
        chrono::Utc::now()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string()
    }

    fn partition_header(partition_key: &str) -> String {
        // Header carries the partition key as a one-element JSON array.
        serde_json::json!([partition_key]).to_string()
    }

    async fn throttle_or_api_error(resp: reqwest::Response) -> StoreError {
        let status = resp.status().as_u16();
        if status == 429 {
            let retry_ms = resp
                .headers()
                .get("x-ms-retry-after-ms")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(1000);
            return StoreError::Throttled {
                retry_after: Duration::from_millis(retry_ms),
            };
        }
        let message = resp.text().await.unwrap_or_default();
        warn!(status, body = %message, "store API error");
        StoreError::Api { status, message }
    }
}

#[async_trait]
impl DocumentStore for CosmosStore {
    async fn read(
        &self,
        container: &str,
        id: &str,
        partition_key: &str,
    ) -> Result<Option<Value>, StoreError> {
        let resource_link = format!("{}/docs/{}", self.collection_link(container), id);
        let date = Self::rfc1123_now();
        let auth = self.auth_header("get", "docs", &resource_link, &date);
        let url = format!("{}/{}", self.endpoint, resource_link);

        let resp = self
            .client
            .get(&url)
            .header("authorization", auth)
            .header("x-ms-date", date)
            .header("x-ms-version", API_VERSION)
            .header("x-ms-documentdb-partitionkey", Self::partition_header(partition_key))
            .send()
            .await?;

        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Self::throttle_or_api_error(resp).await);
        }
        let document = resp.json::<Value>().await?;
        Ok(Some(document))
    }

    async fn upsert(
        &self,
        container: &str,
        partition_key: &str,
        document: &Value,
    ) -> Result<(), StoreError> {
        let resource_link = self.collection_link(container);
        let date = Self::rfc1123_now();
        let auth = self.auth_header("post", "docs", &resource_link, &date);
        let url = format!("{}/{}/docs", self.endpoint, resource_link);

        let resp = self
            .client
            .post(&url)
            .header("authorization", auth)
            .header("x-ms-date", date)
            .header("x-ms-version", API_VERSION)
            .header("x-ms-documentdb-partitionkey", Self::partition_header(partition_key))
            .header("x-ms-documentdb-is-upsert", "True")
            .json(document)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::throttle_or_api_error(resp).await);
        }
        debug!(container, partition_key, "document upserted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CosmosStore {
        CosmosStore::new(&StoreConfig {
            endpoint: "https://example.documents.azure.com".to_string(),
            key: BASE64.encode(b"secret-master-key"),
            database: "fathom".to_string(),
            history_container: "history".to_string(),
            conversations_container: "conversations".to_string(),
            user_memories_container: "user-memories".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn rejects_non_base64_master_key() {
        let result = CosmosStore::new(&StoreConfig {
            endpoint: "https://example".to_string(),
            key: "not base64!!!".to_string(),
            database: "db".to_string(),
            history_container: "h".to_string(),
            conversations_container: "c".to_string(),
            user_memories_container: "u".to_string(),
        });
        assert!(matches!(result, Err(StoreError::Credentials(_))));
    }

    #[test]
    fn auth_header_is_deterministic_for_fixed_inputs() {
        let s = store();
        let a = s.auth_header("get", "docs", "dbs/fathom/colls/history/docs/s1", "thu, 01 jan 2026 00:00:00 gmt");
        let b = s.auth_header("GET", "docs", "dbs/fathom/colls/history/docs/s1", "Thu, 01 Jan 2026 00:00:00 GMT");
        // verb and date are lowercased before signing
        assert_eq!(a, b);
        assert!(a.starts_with("type%3Dmaster%26ver%3D1.0%26sig%3D"));
    }

    #[test]
    fn partition_header_is_a_json_array() {
        assert_eq!(CosmosStore::partition_header("u1"), "[\"u1\"]");
    }
}
