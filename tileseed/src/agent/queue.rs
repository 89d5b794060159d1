//! Job queue protocol.
//!
//! Workers claim jobs with `POST {queue}/api/jobs`; `200` carries a job,
//! `204` means nothing is ready. Progress deltas go to
//! `POST {queue}/api/jobs/{id}` and completion to `DELETE {queue}/api/jobs/{id}`.

use crate::archive::RowOrigin;
use crate::cache::{ExplicitStorage, StorageDescriptor, StorageKind};
use crate::coord::TileRange;
use crate::job::JobParameters;
use crate::render::BoxFuture;
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// Job type tag sent when claiming.
pub const JOB_TYPE: &str = "tile-seeding:raster:png";

/// Path of the jobs collection below the queue URL.
pub const JOBS_PATH: &str = "/api/jobs";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Queue communication errors.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected queue response: {0}")]
    UnexpectedStatus(StatusCode),

    #[error("Invalid job payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid job {id}: {reason}")]
    InvalidJob { id: String, reason: String },
}

/// A claimed job.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueueJob {
    pub id: String,
    pub details: JobDetails,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetails {
    /// Provider entity id, `{api}-tiles`
    pub tile_provider: String,
    /// `{tileset}_{style}`
    pub tile_set: String,
    pub tile_matrix_set: String,
    pub sub_matrices: Vec<SubMatrix>,
    #[serde(default)]
    pub reseed: bool,
    pub storage: QueueStorage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubMatrix {
    pub level: u8,
    pub row_min: u32,
    pub row_max: u32,
    pub col_min: u32,
    pub col_max: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStorage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "job_size")]
    pub job_size: u32,
    #[serde(default)]
    pub vector: String,
    #[serde(default)]
    pub raster: String,
    #[serde(default)]
    pub style: String,
}

/// `jobSize` arrives either as a number or as a numeric string.
fn job_size<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Value {
        Number(u32),
        Text(String),
    }

    match Value::deserialize(deserializer)? {
        Value::Number(n) => Ok(n),
        Value::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Agent-side settings applied to every claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefaults<'a> {
    pub store_root: &'a Path,
    pub ratio: u32,
    /// Tiles in flight per job
    pub concurrency: usize,
}

impl QueueJob {
    /// API id: the provider id without its `-tiles` suffix.
    pub fn api(&self) -> &str {
        let provider = &self.details.tile_provider;
        provider.strip_suffix("-tiles").unwrap_or(provider)
    }

    /// Tileset: the tile set name up to its last `_`, which separates the style.
    pub fn tileset(&self) -> &str {
        let tile_set = &self.details.tile_set;
        match tile_set.rfind('_') {
            Some(i) => &tile_set[..i],
            None => tile_set,
        }
    }

    /// Translate into render job parameters with an explicit storage layout.
    pub fn to_parameters(&self, defaults: &JobDefaults<'_>) -> Result<JobParameters, QueueError> {
        let invalid = |reason: String| QueueError::InvalidJob {
            id: self.id.clone(),
            reason,
        };

        let matrix = self
            .details
            .sub_matrices
            .first()
            .ok_or_else(|| invalid("no sub matrix".to_string()))?;
        let range = TileRange::new(
            matrix.level,
            matrix.col_min,
            matrix.col_max,
            matrix.row_min,
            matrix.row_max,
        )
        .map_err(|e| invalid(e.to_string()))?;

        let storage = &self.details.storage;
        let tile_storage = storage
            .kind
            .parse::<StorageKind>()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(JobParameters {
            id: self.id.clone(),
            api: self.api().to_string(),
            tileset: self.tileset().to_string(),
            tms: self.details.tile_matrix_set.clone(),
            range,
            ratio: defaults.ratio,
            concurrency: defaults.concurrency,
            overwrite: self.details.reseed,
            row_origin: RowOrigin::Bottom,
            storage: StorageDescriptor::Explicit {
                store_root: defaults.store_root.to_path_buf(),
                storage: ExplicitStorage {
                    tile_storage,
                    job_size: storage.job_size,
                    vector: storage.vector.clone(),
                    raster: storage.raster.clone(),
                    style: storage.style.clone(),
                },
            },
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct ClaimRequest<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
}

/// Progress delta of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressBody {
    pub tile_set: String,
    pub tile_matrix_set: String,
    pub level: u8,
    pub delta: u64,
}

/// Completion report of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinishBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retry: bool,
}

/// Client side of the job queue.
pub trait QueueClient: Send + Sync {
    /// Claim the next job; `Ok(None)` when none is ready.
    fn claim(&self) -> BoxFuture<'_, Result<Option<QueueJob>, QueueError>>;

    fn progress<'a>(
        &'a self,
        job_id: &'a str,
        body: &'a ProgressBody,
    ) -> BoxFuture<'a, Result<(), QueueError>>;

    fn finish<'a>(
        &'a self,
        job_id: &'a str,
        body: &'a FinishBody,
    ) -> BoxFuture<'a, Result<(), QueueError>>;

    /// Human-readable queue location for logs.
    fn endpoint(&self) -> &str;
}

/// [`QueueClient`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpQueueClient {
    client: reqwest::Client,
    jobs_url: String,
    worker_id: String,
}

impl HttpQueueClient {
    /// Client for the queue at `queue_url`, claiming as `worker_id`.
    pub fn new(queue_url: &str, worker_id: &str) -> Result<Self, QueueError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            jobs_url: format!("{}{}", queue_url.trim_end_matches('/'), JOBS_PATH),
            worker_id: worker_id.to_string(),
        })
    }

    pub fn jobs_url(&self) -> &str {
        &self.jobs_url
    }

    fn job_url(&self, job_id: &str) -> String {
        format!("{}/{}", self.jobs_url, job_id)
    }

    async fn claim_next(&self) -> Result<Option<QueueJob>, QueueError> {
        let response = self
            .client
            .post(&self.jobs_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&ClaimRequest {
                id: &self.worker_id,
                kind: JOB_TYPE,
            })
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let body = response.bytes().await?;
                let job: QueueJob = serde_json::from_slice(&body)?;
                trace!(job_id = %job.id, "Claimed job");
                Ok(Some(job))
            }
            StatusCode::NO_CONTENT => Ok(None),
            status => Err(QueueError::UnexpectedStatus(status)),
        }
    }

    async fn send<T: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        job_id: &str,
        body: &T,
    ) -> Result<(), QueueError> {
        let response = self
            .client
            .request(method, self.job_url(job_id))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(QueueError::UnexpectedStatus(status))
        }
    }
}

impl QueueClient for HttpQueueClient {
    fn claim(&self) -> BoxFuture<'_, Result<Option<QueueJob>, QueueError>> {
        Box::pin(self.claim_next())
    }

    fn progress<'a>(
        &'a self,
        job_id: &'a str,
        body: &'a ProgressBody,
    ) -> BoxFuture<'a, Result<(), QueueError>> {
        Box::pin(self.send(reqwest::Method::POST, job_id, body))
    }

    fn finish<'a>(
        &'a self,
        job_id: &'a str,
        body: &'a FinishBody,
    ) -> BoxFuture<'a, Result<(), QueueError>> {
        Box::pin(self.send(reqwest::Method::DELETE, job_id, body))
    }

    fn endpoint(&self) -> &str {
        &self.jobs_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn payload(job_size: serde_json::Value) -> serde_json::Value {
        json!({
            "id": "42",
            "details": {
                "tileProvider": "vineyards-tiles",
                "tileSet": "vineyards_night_mode",
                "tileMatrixSet": "WebMercatorQuad",
                "subMatrices": [{ "level": 10, "rowMin": 64, "rowMax": 95, "colMin": 32, "colMax": 63 }],
                "reseed": true,
                "storage": {
                    "type": "PER_JOB",
                    "jobSize": job_size,
                    "vector": "vector/{partition}.mbtiles",
                    "raster": "raster/{partition}.mbtiles",
                    "style": "styles/night.json"
                }
            }
        })
    }

    fn defaults(root: &Path) -> JobDefaults<'_> {
        JobDefaults {
            store_root: root,
            ratio: 2,
            concurrency: 1,
        }
    }

    #[test]
    fn test_job_size_string_or_number() {
        let from_string: QueueJob = serde_json::from_value(payload(json!("1024"))).unwrap();
        let from_number: QueueJob = serde_json::from_value(payload(json!(1024))).unwrap();
        assert_eq!(from_string.details.storage.job_size, 1024);
        assert_eq!(from_string, from_number);

        assert!(serde_json::from_value::<QueueJob>(payload(json!("big"))).is_err());
    }

    #[test]
    fn test_translate_to_parameters() {
        let job: QueueJob = serde_json::from_value(payload(json!("1024"))).unwrap();
        let root = Path::new("/srv/store");
        let params = job.to_parameters(&defaults(root)).unwrap();

        assert_eq!(params.id, "42");
        assert_eq!(params.api, "vineyards");
        assert_eq!(params.tileset, "vineyards_night");
        assert_eq!(params.range, TileRange::new(10, 32, 63, 64, 95).unwrap());
        assert_eq!(params.ratio, 2);
        assert!(params.overwrite);
        assert_eq!(params.row_origin, RowOrigin::Bottom);
        match params.storage {
            StorageDescriptor::Explicit { store_root, storage } => {
                assert_eq!(store_root, root);
                assert_eq!(storage.tile_storage, StorageKind::PerJob);
                assert_eq!(storage.job_size, 1024);
                assert_eq!(storage.style, "styles/night.json");
            }
            other => panic!("unexpected storage {:?}", other),
        }
    }

    #[test]
    fn test_tileset_without_style_suffix() {
        let mut job: QueueJob = serde_json::from_value(payload(json!(0))).unwrap();
        job.details.tile_set = "plain".into();
        assert_eq!(job.tileset(), "plain");
    }

    #[test]
    fn test_translate_rejects_bad_jobs() {
        let root = Path::new("/srv/store");

        let mut job: QueueJob = serde_json::from_value(payload(json!(0))).unwrap();
        job.details.sub_matrices.clear();
        assert!(matches!(
            job.to_parameters(&defaults(root)),
            Err(QueueError::InvalidJob { .. })
        ));

        let mut job: QueueJob = serde_json::from_value(payload(json!(0))).unwrap();
        job.details.storage.kind = "TAPE".into();
        let err = job.to_parameters(&defaults(root)).unwrap_err();
        assert!(err.to_string().contains("Invalid job 42"));
    }

    #[test]
    fn test_finish_body_omits_missing_error() {
        let ok = FinishBody {
            error: None,
            retry: true,
        };
        assert_eq!(serde_json::to_value(&ok).unwrap(), json!({ "retry": true }));

        let failed = FinishBody {
            error: Some("a | b".into()),
            retry: true,
        };
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({ "error": "a | b", "retry": true })
        );
    }

    #[test]
    fn test_progress_body_field_names() {
        let body = ProgressBody {
            tile_set: "vineyards_day".into(),
            tile_matrix_set: "WebMercatorQuad".into(),
            level: 8,
            delta: 12,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({ "tileSet": "vineyards_day", "tileMatrixSet": "WebMercatorQuad", "level": 8, "delta": 12 })
        );
    }

    /// Answer one HTTP request with `response` and return the raw request.
    async fn serve_once(response: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length || n == 0 {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });

        (url, handle)
    }

    fn http_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        )
    }

    #[tokio::test]
    async fn test_claim_no_content() {
        let (url, server) = serve_once(http_response("204 No Content", "")).await;
        let client = HttpQueueClient::new(&url, "worker-1").unwrap();

        assert!(client.claim().await.unwrap().is_none());

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/jobs HTTP/1.1"));
        assert!(request.contains(r#""id":"worker-1""#));
        assert!(request.contains(r#""type":"tile-seeding:raster:png""#));
    }

    #[tokio::test]
    async fn test_claim_job() {
        let body = payload(json!("0")).to_string();
        let (url, server) = serve_once(http_response("200 OK", &body)).await;
        let client = HttpQueueClient::new(&format!("{}/", url), "worker-1").unwrap();

        let job = client.claim().await.unwrap().unwrap();
        assert_eq!(job.id, "42");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_claim_server_error() {
        let (url, server) = serve_once(http_response("503 Service Unavailable", "")).await;
        let client = HttpQueueClient::new(&url, "worker-1").unwrap();

        let err = client.claim().await.unwrap_err();
        assert!(matches!(err, QueueError::UnexpectedStatus(StatusCode::SERVICE_UNAVAILABLE)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_finish_uses_delete() {
        let (url, server) = serve_once(http_response("204 No Content", "")).await;
        let client = HttpQueueClient::new(&url, "worker-1").unwrap();
        let body = FinishBody {
            error: None,
            retry: true,
        };

        client.finish("42", &body).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("DELETE /api/jobs/42 HTTP/1.1"));
        assert!(request.contains(r#"{"retry":true}"#));
    }

    #[tokio::test]
    async fn test_unreachable_queue_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = HttpQueueClient::new(&url, "worker-1").unwrap();
        assert!(matches!(client.claim().await, Err(QueueError::Transport(_))));
    }
}
