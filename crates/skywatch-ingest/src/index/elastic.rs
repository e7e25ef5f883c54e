//! Elasticsearch implementation of [`SearchIndex`] over the REST API.
//!
//! Only the handful of endpoints the pipeline needs are used:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | ping | `GET /` |
//! | exists | `HEAD /{index}` |
//! | create | `PUT /{index}` with [`default_mappings`] |
//! | write (cluster id) | `POST /{index}/_doc` |
//! | write (own id) | `PUT /{index}/_doc/{id}` |
//!
//! Index names and document ids are used in paths as-is. Document ids are
//! hex digests and index names are lowercase by Elasticsearch rules, so
//! neither needs escaping.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, StatusCode, header};
use serde::Deserialize;
use skywatch_core::RetryPolicy;

use super::{IndexResponse, SearchIndex};
use crate::{Error, Result};

/// Error type Elasticsearch reports when creating an index that exists.
const ALREADY_EXISTS: &str = "resource_already_exists_exception";

/// Connection settings for the search cluster.
#[derive(Debug, Clone)]
pub struct ElasticConfig {
    /// Cluster base URL (e.g., "http://localhost:9200").
    pub url: String,

    /// Basic auth username.
    pub username: Option<String>,

    /// Basic auth password.
    pub password: Option<String>,

    /// TCP connect timeout. Requests themselves are unbounded.
    pub connect_timeout: Duration,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            username: None,
            password: None,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Subset of the `GET /` answer logged at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterInfo {
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub version: ClusterVersion,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterVersion {
    #[serde(default)]
    pub number: String,
}

#[derive(Debug, Deserialize)]
struct WriteAnswer {
    #[serde(rename = "_id")]
    id: String,
    result: String,
}

/// Mapping applied when the pipeline creates the event index.
///
/// Coordinates stay keywords so catalog strings are stored untouched.
pub fn default_mappings() -> serde_json::Value {
    serde_json::json!({
        "mappings": {
            "properties": {
                "eventTS": { "type": "date", "format": "epoch_millis" },
                "eventSource": { "type": "keyword" },
                "eventType": { "type": "keyword" },
                "title": {
                    "type": "text",
                    "fields": { "keyword": { "type": "keyword", "ignore_above": 256 } }
                },
                "urgency": { "type": "byte" },
                "ra": {
                    "properties": {
                        "ra_val": { "type": "keyword" },
                        "ra_pm": { "type": "keyword" }
                    }
                },
                "dec": {
                    "properties": {
                        "dec_val": { "type": "keyword" },
                        "dec_pm": { "type": "keyword" }
                    }
                }
            }
        }
    })
}

/// Elasticsearch client.
#[derive(Debug, Clone)]
pub struct ElasticIndex {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl ElasticIndex {
    /// Build a client without touching the network.
    pub fn new(config: &ElasticConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Build a client and wait until the cluster answers a ping.
    ///
    /// Fails with a fatal [`skywatch_core::Error::RetriesExhausted`] once the
    /// policy's budget is spent.
    pub async fn connect(config: &ElasticConfig, policy: &RetryPolicy) -> Result<Self> {
        let index = Self::new(config)?;

        let target = &index;
        let info = policy
            .run("elasticsearch connect", move |_| target.ping())
            .await?;

        tracing::info!(
            "Connected to Elasticsearch: url={}, cluster={}, version={}",
            index.base_url,
            info.cluster_name,
            info.version.number
        );

        Ok(index)
    }

    /// Cluster base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /`.
    pub async fn ping(&self) -> Result<ClusterInfo> {
        let response = self
            .request(Method::GET, format!("{}/", self.base_url))
            .send()
            .await?;
        let response = expect_success(response).await?;
        Ok(response.json().await?)
    }

    fn index_url(&self, index: &str) -> String {
        format!("{}/{}", self.base_url, index)
    }

    fn document_url(&self, index: &str, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/{}/_doc/{}", self.base_url, index, id),
            None => format!("{}/{}/_doc", self.base_url, index),
        }
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.username {
            Some(username) => builder.basic_auth(username, self.password.as_deref()),
            None => builder,
        }
    }
}

impl SearchIndex for ElasticIndex {
    async fn index_exists(&self, index: &str) -> Result<bool> {
        let response = self
            .request(Method::HEAD, self.index_url(index))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(Error::Elastic {
                status: status.as_u16(),
                body: String::new(),
            }),
        }
    }

    async fn create_index(&self, index: &str) -> Result<()> {
        let response = self
            .request(Method::PUT, self.index_url(index))
            .json(&default_mappings())
            .send()
            .await?;

        match expect_success(response).await {
            Ok(_) => Ok(()),
            // Lost a creation race with another ingestor; the index is there.
            Err(Error::Elastic { body, .. }) if body.contains(ALREADY_EXISTS) => {
                tracing::info!(index = %index, "Index created concurrently");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn index_document(
        &self,
        index: &str,
        id: Option<&str>,
        body: &str,
    ) -> Result<IndexResponse> {
        let method = if id.is_some() { Method::PUT } else { Method::POST };
        let response = self
            .request(method, self.document_url(index, id))
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await?;

        let response = expect_success(response).await?;
        let status = response.status().as_u16();
        let answer: WriteAnswer = response.json().await?;

        Ok(IndexResponse {
            status,
            id: answer.id,
            result: answer.result,
        })
    }
}

/// Turn a non-2xx answer into [`Error::Elastic`] carrying the body.
async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Elastic {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_at(url: &str) -> ElasticIndex {
        ElasticIndex::new(&ElasticConfig {
            url: url.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_urls() {
        let index = index_at("http://search:9200/");
        assert_eq!(index.base_url(), "http://search:9200");
        assert_eq!(index.index_url("cosmic-events"), "http://search:9200/cosmic-events");
        assert_eq!(
            index.document_url("cosmic-events", None),
            "http://search:9200/cosmic-events/_doc"
        );
        assert_eq!(
            index.document_url("cosmic-events", Some("abc123")),
            "http://search:9200/cosmic-events/_doc/abc123"
        );
    }

    #[test]
    fn test_default_mappings_cover_wire_fields() {
        let mappings = default_mappings();
        let properties = &mappings["mappings"]["properties"];
        for field in ["eventTS", "eventSource", "eventType", "title", "urgency", "ra", "dec"] {
            assert!(properties.get(field).is_some(), "missing mapping for {field}");
        }
        assert_eq!(properties["eventTS"]["format"], "epoch_millis");
        assert_eq!(properties["dec"]["properties"]["dec_pm"]["type"], "keyword");
    }

    #[test]
    fn test_write_answer_decodes() {
        let answer: WriteAnswer = serde_json::from_str(
            r#"{"_index":"cosmic-events","_id":"abc","_version":1,"result":"created","_shards":{"total":2,"successful":1,"failed":0}}"#,
        )
        .unwrap();
        assert_eq!(answer.id, "abc");
        assert_eq!(answer.result, "created");
    }

    #[test]
    fn test_cluster_info_tolerates_missing_fields() {
        let info: ClusterInfo = serde_json::from_str(r#"{"name":"node-1"}"#).unwrap();
        assert!(info.cluster_name.is_empty());
        assert!(info.version.number.is_empty());
    }

    #[tokio::test]
    async fn test_connect_past_retry_budget_is_fatal() {
        let config = ElasticConfig {
            url: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        };
        let policy = RetryPolicy::BROKER.with_max_retries(1);

        let err = ElasticIndex::connect(&config, &policy).await.unwrap_err();
        assert!(err.is_fatal(), "unexpected error: {err}");
    }
}
