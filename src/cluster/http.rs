//! Elasticsearch REST client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{
    AliasAction, BulkItemResult, BulkOperation, BulkResponse, HealthStatus, ScrollPage,
    SearchCluster, SearchHit, SearchHits, SearchRequest,
};
use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::search::{EngineQuery, IndexMapping, IndexSettings};

/// [`SearchCluster`] over the Elasticsearch HTTP API.
#[derive(Debug, Clone)]
pub struct HttpCluster {
    client: Client,
    base_url: String,
}

impl HttpCluster {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        Self::new(&config.cluster_url, config.request_timeout())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send and decode a JSON response, mapping error statuses.
    async fn send(&self, req: RequestBuilder) -> Result<Value> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }
        Ok(resp.json().await?)
    }

    /// HEAD-style existence check: 2xx is true, 404 is false.
    async fn exists(&self, path: &str) -> Result<bool> {
        let resp = self.client.head(self.url(path)).send().await?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(SearchError::Status { status: s.as_u16(), body: String::new() }),
        }
    }
}

fn status_error(status: StatusCode, body: String) -> SearchError {
    if status == StatusCode::NOT_FOUND && body.contains("index_not_found_exception") {
        SearchError::IndexNotFound(body)
    } else {
        SearchError::Status { status: status.as_u16(), body }
    }
}

fn ttl_param(ttl: Duration) -> String {
    format!("{}s", ttl.as_secs().max(1))
}

fn parse_hits(body: &Value) -> Vec<SearchHit> {
    body["hits"]["hits"]
        .as_array()
        .map(|hits| {
            hits.iter()
                .filter_map(|h| {
                    Some(SearchHit {
                        index: h["_index"].as_str()?.to_string(),
                        id: h["_id"].as_str()?.to_string(),
                        source: h["_source"].as_object().cloned().unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_total(body: &Value) -> u64 {
    let total = &body["hits"]["total"];
    total["value"].as_u64().or_else(|| total.as_u64()).unwrap_or(0)
}

fn parse_scroll(body: &Value) -> ScrollPage {
    ScrollPage {
        scroll_id: body["_scroll_id"].as_str().map(str::to_string),
        hits: parse_hits(body),
    }
}

fn parse_bulk_items(body: &Value) -> Vec<BulkItemResult> {
    body["items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_object()?.values().next())
                .map(|result| BulkItemResult {
                    index: result["_index"].as_str().unwrap_or_default().to_string(),
                    id: result["_id"].as_str().unwrap_or_default().to_string(),
                    status: result["status"].as_u64().unwrap_or(0) as u16,
                    error: match &result["error"] {
                        Value::Null => None,
                        Value::String(s) => Some(s.clone()),
                        e => Some(
                            e["reason"]
                                .as_str()
                                .map_or_else(|| e.to_string(), str::to_string),
                        ),
                    },
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl SearchCluster for HttpCluster {
    async fn create_index(&self, name: &str, settings: &IndexSettings, mapping: &IndexMapping) -> Result<()> {
        let body = json!({"settings": settings.to_json(), "mappings": mapping.to_json()});
        self.send(self.client.put(self.url(name)).json(&body)).await?;
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> Result<()> {
        self.send(self.client.delete(self.url(name))).await?;
        Ok(())
    }

    async fn index_exists(&self, name: &str) -> Result<bool> {
        self.exists(name).await
    }

    async fn resolve_alias(&self, alias: &str) -> Result<Vec<String>> {
        let body = self.send(self.client.get(self.url(&format!("{alias}/_alias")))).await?;
        Ok(body.as_object().map(|m| m.keys().cloned().collect()).unwrap_or_default())
    }

    async fn alias_exists(&self, index: &str, alias: &str) -> Result<bool> {
        self.exists(&format!("{index}/_alias/{alias}")).await
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<bool> {
        let body = json!({"actions": actions.iter().map(AliasAction::to_json).collect::<Vec<_>>()});
        let resp = self.send(self.client.post(self.url("_aliases")).json(&body)).await?;
        Ok(resp["acknowledged"].as_bool().unwrap_or(false))
    }

    async fn bulk(&self, ops: &[BulkOperation]) -> Result<BulkResponse> {
        if ops.is_empty() {
            return Ok(BulkResponse::default());
        }
        let mut payload = String::new();
        for op in ops {
            op.write_ndjson(&mut payload);
        }
        debug!(actions = ops.len(), bytes = payload.len(), "Sending bulk request");
        let req = self
            .client
            .post(self.url("_bulk"))
            .header("content-type", "application/x-ndjson")
            .body(payload);
        let body = self.send(req).await?;
        Ok(BulkResponse { items: parse_bulk_items(&body) })
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchHits> {
        let body = self
            .send(self.client.post(self.url(&format!("{index}/_search"))).json(&request.to_json()))
            .await?;
        Ok(SearchHits { total: parse_total(&body), hits: parse_hits(&body) })
    }

    async fn count(&self, index: &str, query: &EngineQuery) -> Result<u64> {
        let body = self
            .send(self.client.post(self.url(&format!("{index}/_count"))).json(&json!({"query": query.to_json()})))
            .await?;
        Ok(body["count"].as_u64().unwrap_or(0))
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Map<String, Value>>> {
        let resp = self.client.get(self.url(&format!("{index}/_doc/{id}"))).send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            let body = resp.text().await.unwrap_or_default();
            // a missing index is an error, a missing document is not
            return if body.contains("index_not_found_exception") {
                Err(SearchError::IndexNotFound(body))
            } else {
                Ok(None)
            };
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }
        let body: Value = resp.json().await?;
        if !body["found"].as_bool().unwrap_or(false) {
            return Ok(None);
        }
        Ok(body["_source"].as_object().cloned())
    }

    async fn open_scroll(&self, index: &str, query: &EngineQuery, size: usize, ttl: Duration) -> Result<ScrollPage> {
        let url = self.url(&format!("{index}/_search?scroll={}", ttl_param(ttl)));
        let body = json!({"query": query.to_json(), "size": size, "sort": ["_doc"]});
        let resp = self.send(self.client.post(url).json(&body)).await?;
        Ok(parse_scroll(&resp))
    }

    async fn scroll_next(&self, scroll_id: &str, ttl: Duration) -> Result<ScrollPage> {
        let body = json!({"scroll": ttl_param(ttl), "scroll_id": scroll_id});
        let resp = self.send(self.client.post(self.url("_search/scroll")).json(&body)).await?;
        Ok(parse_scroll(&resp))
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        let body = json!({"scroll_id": [scroll_id]});
        self.send(self.client.delete(self.url("_search/scroll")).json(&body)).await?;
        Ok(())
    }

    async fn refresh(&self, index: &str) -> Result<()> {
        self.send(self.client.post(self.url(&format!("{index}/_refresh")))).await?;
        Ok(())
    }

    async fn cluster_health(&self) -> Result<HealthStatus> {
        let body = self.send(self.client.get(self.url("_cluster/health"))).await?;
        match body["status"].as_str() {
            Some("green") => Ok(HealthStatus::Green),
            Some("yellow") => Ok(HealthStatus::Yellow),
            Some("red") => Ok(HealthStatus::Red),
            other => Err(SearchError::Cluster(format!("unexpected health status: {other:?}"))),
        }
    }
}
