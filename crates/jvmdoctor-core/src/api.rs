//! Request/response calls against the hub's HTTP API.
//!
//! [`HubApi`] is the seam the dashboard is written against; [`HttpHubApi`]
//! is the reqwest implementation. Fetch failures are returned to the caller,
//! which logs them. Nothing here retries.

use std::future::Future;
use std::time::Duration;

use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::sample::{ProcessId, TelemetrySample, lenient_i64, null_as_default};
use crate::threads::{DeadlockReport, ThreadPatch, TopThreads};

// ---------------------------------------------------------------------------
// Fleet model
// ---------------------------------------------------------------------------

/// A registered process as the hub lists it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessInfo {
    pub id: ProcessId,
    #[serde(deserialize_with = "null_as_default")]
    pub app_name: String,
    pub host: Option<String>,
    #[serde(deserialize_with = "lenient_i64")]
    pub port: Option<i64>,
    pub jvm_name: Option<String>,
    pub jvm_version: Option<String>,
    #[serde(deserialize_with = "lenient_i64")]
    pub start_time: Option<i64>,
    #[serde(deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(deserialize_with = "lenient_i64")]
    pub registered_at: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub last_heartbeat: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub thread_server_port: Option<i64>,
}

impl ProcessInfo {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }

    /// `host:port`, or whichever half is known.
    pub fn address(&self) -> String {
        match (&self.host, self.port) {
            (Some(h), Some(p)) => format!("{h}:{p}"),
            (Some(h), None) => h.clone(),
            (None, Some(p)) => format!(":{p}"),
            (None, None) => "-".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertRecord {
    #[serde(deserialize_with = "null_as_default")]
    pub id: i64,
    pub app_id: Option<ProcessId>,
    #[serde(deserialize_with = "null_as_default")]
    pub alert_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub alert_msg: String,
    #[serde(deserialize_with = "null_as_default")]
    pub alert_level: String,
    #[serde(deserialize_with = "null_as_default")]
    pub created_at: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub acknowledged: bool,
    #[serde(deserialize_with = "lenient_i64")]
    pub acknowledged_at: Option<i64>,
    pub acknowledged_by: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub app_name: String,
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jvm_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jvm_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    /// Port of the agent's thread server, if it runs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_server_port: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Registered {
    pub app_id: ProcessId,
    #[serde(deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(deserialize_with = "lenient_i64")]
    pub server_time: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeBody<'a> {
    acknowledged_by: &'a str,
}

pub fn running(processes: &[ProcessInfo]) -> impl Iterator<Item = &ProcessInfo> {
    processes.iter().filter(|p| p.is_running())
}

pub fn unacknowledged_count(alerts: &[AlertRecord]) -> usize {
    alerts.iter().filter(|a| !a.acknowledged).count()
}

// ---------------------------------------------------------------------------
// HubApi
// ---------------------------------------------------------------------------

pub trait HubApi: Send + Sync + 'static {
    fn list_processes(&self) -> impl Future<Output = Result<Vec<ProcessInfo>>> + Send;

    fn list_alerts(&self) -> impl Future<Output = Result<Vec<AlertRecord>>> + Send;

    /// Samples for `process` newer than `since_ms`, in whatever order the
    /// hub returns them.
    fn history(
        &self,
        process: &ProcessId,
        since_ms: i64,
    ) -> impl Future<Output = Result<Vec<TelemetrySample>>> + Send;

    fn top_threads(&self, process: &ProcessId) -> impl Future<Output = Result<TopThreads>> + Send;

    fn deadlocks(&self, process: &ProcessId) -> impl Future<Output = Result<DeadlockReport>> + Send;

    fn thread_stack(
        &self,
        process: &ProcessId,
        thread_id: i64,
    ) -> impl Future<Output = Result<ThreadPatch>> + Send;

    fn acknowledge_alert(&self, alert_id: i64, by: &str) -> impl Future<Output = Result<()>> + Send;

    fn register(&self, request: &RegisterRequest) -> impl Future<Output = Result<Registered>> + Send;

    fn offline(&self, process: &ProcessId) -> impl Future<Output = Result<()>> + Send;

    fn heartbeat(&self, process: &ProcessId) -> impl Future<Output = Result<()>> + Send;
}

/// reqwest-backed [`HubApi`].
#[derive(Debug, Clone)]
pub struct HttpHubApi {
    base: Url,
    client: reqwest::Client,
}

impl HttpHubApi {
    pub fn new(hub: &Url) -> Result<Self> {
        let mut base = hub.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { base, client })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// `base` with `segments` appended, each one percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!("GET {url}");
        let resp = self.client.get(url.clone()).send().await?;
        let body = Self::check(resp, &url).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn post<B: Serialize + ?Sized>(&self, url: Url, body: Option<&B>) -> Result<Vec<u8>> {
        debug!("POST {url}");
        let mut req = self.client.post(url.clone());
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await?;
        Self::check(resp, &url).await
    }

    async fn check(resp: reqwest::Response, url: &Url) -> Result<Vec<u8>> {
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                path: url.path().to_string(),
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

impl HubApi for HttpHubApi {
    async fn list_processes(&self) -> Result<Vec<ProcessInfo>> {
        self.get(self.url(&["api", "apps"])?).await
    }

    async fn list_alerts(&self) -> Result<Vec<AlertRecord>> {
        self.get(self.url(&["api", "alerts"])?).await
    }

    async fn history(&self, process: &ProcessId, since_ms: i64) -> Result<Vec<TelemetrySample>> {
        let mut url = self.url(&["api", "metrics", process.as_str(), "history"])?;
        url.query_pairs_mut().append_pair("since", &since_ms.to_string());
        self.get(url).await
    }

    async fn top_threads(&self, process: &ProcessId) -> Result<TopThreads> {
        self.get(self.url(&["api", "apps", process.as_str(), "threads", "top"])?).await
    }

    async fn deadlocks(&self, process: &ProcessId) -> Result<DeadlockReport> {
        self.get(self.url(&["api", "apps", process.as_str(), "deadlock"])?).await
    }

    async fn thread_stack(&self, process: &ProcessId, thread_id: i64) -> Result<ThreadPatch> {
        let thread_id = thread_id.to_string();
        self.get(self.url(&["api", "apps", process.as_str(), "threads", thread_id.as_str(), "stack"])?)
            .await
    }

    async fn acknowledge_alert(&self, alert_id: i64, by: &str) -> Result<()> {
        let alert_id = alert_id.to_string();
        let url = self.url(&["api", "alerts", alert_id.as_str(), "acknowledge"])?;
        self.post(url, Some(&AcknowledgeBody { acknowledged_by: by }))
            .await?;
        Ok(())
    }

    async fn register(&self, request: &RegisterRequest) -> Result<Registered> {
        let body = self.post(self.url(&["api", "apps", "register"])?, Some(request)).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn offline(&self, process: &ProcessId) -> Result<()> {
        let url = self.url(&["api", "apps", process.as_str(), "offline"])?;
        self.post::<()>(url, None).await?;
        Ok(())
    }

    async fn heartbeat(&self, process: &ProcessId) -> Result<()> {
        let url = self.url(&["api", "apps", process.as_str(), "heartbeat"])?;
        self.post::<()>(url, None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_gets_trailing_slash() {
        let api = HttpHubApi::new(&Url::parse("http://hub:8080/doctor").unwrap()).unwrap();
        assert_eq!(api.base().as_str(), "http://hub:8080/doctor/");
        assert_eq!(
            api.url(&["api", "apps"]).unwrap().as_str(),
            "http://hub:8080/doctor/api/apps"
        );
    }

    #[test]
    fn process_ids_are_escaped_in_paths() {
        let api = HttpHubApi::new(&Url::parse("http://hub:8080/").unwrap()).unwrap();
        let id = ProcessId::from("a/b?c");
        let url = api.url(&["api", "apps", id.as_str(), "offline"]).unwrap();
        assert_eq!(url.as_str(), "http://hub:8080/api/apps/a%2Fb%3Fc/offline");
        assert_eq!(url.query(), None);
        assert_eq!(url.path_segments().map(|s| s.count()), Some(4));
    }

    #[test]
    fn process_info_tolerates_nulls_and_extra_fields() {
        let p: ProcessInfo = serde_json::from_str(
            r#"{"id":4,"appName":"orders","host":"10.0.0.5","port":8081,"status":"running",
                "jvmName":null,"threadServerPort":null,"whatever":true}"#,
        )
        .unwrap();
        assert_eq!(p.id, ProcessId::from("4"));
        assert!(p.is_running());
        assert_eq!(p.address(), "10.0.0.5:8081");
        assert_eq!(p.thread_server_port, None);
    }

    #[test]
    fn alert_record_decodes() {
        let a: AlertRecord = serde_json::from_str(
            r#"{"id":1,"appId":4,"alertType":"HEAP_HIGH","alertMsg":"heap 95%","alertLevel":"critical",
                "createdAt":1700000000000,"acknowledged":false,"acknowledgedAt":null,"acknowledgedBy":null}"#,
        )
        .unwrap();
        assert_eq!(a.app_id, Some(ProcessId::from(4u64)));
        assert!(!a.acknowledged);
        assert_eq!(unacknowledged_count(&[a.clone(), AlertRecord { acknowledged: true, ..a }]), 1);
    }

    #[test]
    fn running_filter() {
        let list = vec![
            ProcessInfo {
                status: "running".into(),
                ..Default::default()
            },
            ProcessInfo {
                status: "offline".into(),
                ..Default::default()
            },
        ];
        assert_eq!(running(&list).count(), 1);
    }

    #[test]
    fn register_request_wire_shape() {
        let req = RegisterRequest {
            app_name: "orders".into(),
            host: "localhost".into(),
            port: 8081,
            ..Default::default()
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["appName"], "orders");
        assert!(v.get("jvmName").is_none());
    }

    #[test]
    fn acknowledge_body_shape() {
        let v = serde_json::to_value(AcknowledgeBody {
            acknowledged_by: "dashboard",
        })
        .unwrap();
        assert_eq!(v, serde_json::json!({"acknowledgedBy": "dashboard"}));
    }
}
