//! API-server proxy seam
//!
//! The aggregation and benchmark layers talk to the cluster exclusively
//! through the [`ApiProxy`] trait: raw API-server paths in, decoded JSON or
//! raw text out. The production implementation wraps a `kube::Client`; tests
//! substitute a scripted double.

use crate::error::Result;
use async_trait::async_trait;
use kube::Client;
use serde_json::Value;

// =============================================================================
// Trait
// =============================================================================

/// Proxied request collaborator over API-server paths.
#[async_trait]
pub trait ApiProxy: Send + Sync {
    /// GET a path and decode the response as JSON.
    async fn get_json(&self, path: &str) -> Result<Value>;

    /// GET a path and return the raw response body as text (pod logs,
    /// metrics exposition).
    async fn get_text(&self, path: &str) -> Result<String>;

    /// POST a JSON body to a path (resource creation).
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value>;

    /// DELETE a path, with an optional JSON body (delete options).
    async fn delete(&self, path: &str, body: Option<&Value>) -> Result<Value>;
}

// =============================================================================
// Path helpers
// =============================================================================

/// Namespaced pod list path with an encoded label selector.
pub fn pods_by_selector_path(namespace: &str, selector: &str) -> String {
    format!(
        "/api/v1/namespaces/{}/pods?labelSelector={}",
        namespace,
        urlencoding::encode(selector)
    )
}

/// Cluster-wide or namespaced job list path with an encoded label selector.
pub fn jobs_by_selector_path(namespace: Option<&str>, selector: &str) -> String {
    let encoded = urlencoding::encode(selector).into_owned();
    match namespace {
        Some(ns) => format!(
            "/apis/batch/v1/namespaces/{}/jobs?labelSelector={}",
            ns, encoded
        ),
        None => format!("/apis/batch/v1/jobs?labelSelector={}", encoded),
    }
}

// =============================================================================
// kube-backed implementation
// =============================================================================

/// [`ApiProxy`] over a `kube::Client`, issuing raw-path requests.
#[derive(Clone)]
pub struct KubeApiProxy {
    client: Client,
}

impl KubeApiProxy {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn build(
        method: &str,
        path: &str,
        body: Option<&Value>,
    ) -> Result<http::Request<Vec<u8>>> {
        let mut builder = http::Request::builder().method(method).uri(path);
        let bytes = match body {
            Some(value) => {
                builder = builder.header(http::header::CONTENT_TYPE, "application/json");
                serde_json::to_vec(value)?
            }
            None => Vec::new(),
        };
        Ok(builder.body(bytes)?)
    }
}

#[async_trait]
impl ApiProxy for KubeApiProxy {
    async fn get_json(&self, path: &str) -> Result<Value> {
        let req = Self::build("GET", path, None)?;
        Ok(self.client.request::<Value>(req).await?)
    }

    async fn get_text(&self, path: &str) -> Result<String> {
        let req = Self::build("GET", path, None)?;
        Ok(self.client.request_text(req).await?)
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let req = Self::build("POST", path, Some(body))?;
        Ok(self.client.request::<Value>(req).await?)
    }

    async fn delete(&self, path: &str, body: Option<&Value>) -> Result<Value> {
        let req = Self::build("DELETE", path, body)?;
        Ok(self.client.request::<Value>(req).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_paths_are_encoded() {
        let path = pods_by_selector_path("kube-system", "a=b,c=d");
        assert_eq!(
            path,
            "/api/v1/namespaces/kube-system/pods?labelSelector=a%3Db%2Cc%3Dd"
        );

        let all = jobs_by_selector_path(None, "kbench=fio");
        assert_eq!(all, "/apis/batch/v1/jobs?labelSelector=kbench%3Dfio");

        let scoped = jobs_by_selector_path(Some("default"), "kbench=fio");
        assert!(scoped.starts_with("/apis/batch/v1/namespaces/default/jobs"));
    }

    #[test]
    fn test_request_builder_sets_json_content_type() {
        let req =
            KubeApiProxy::build("POST", "/api/v1/pods", Some(&serde_json::json!({"a": 1})))
                .unwrap();
        assert_eq!(req.method(), "POST");
        assert_eq!(
            req.headers().get(http::header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert!(!req.body().is_empty());

        let get = KubeApiProxy::build("GET", "/api/v1/pods", None).unwrap();
        assert!(get.body().is_empty());
    }
}
