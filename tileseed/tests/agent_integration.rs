//! Integration tests for the queue agent worker.
//!
//! A small HTTP server stands in for the job queue. The tests verify:
//! - Empty polls (204) never start a job
//! - A claimed job is rendered, reported and finished with retry
//! - An unreachable queue keeps the worker polling until cancelled

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tileseed::agent::{HttpQueueClient, Worker, WorkerConfig, JOB_TYPE};
use tileseed::archive::{ArchiveHandle, ArchiveOpenOptions};
use tileseed::coord::TileCoord;
use tileseed::job::JobServices;
use tileseed::render::{
    BoxFuture, EncodeError, EncodeParams, RawImage, RenderError, RenderRequest, Renderer,
    ResourceSource, TileEncoder,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

// =============================================================================
// Test Helpers
// =============================================================================

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    path: String,
    body: String,
}

type Respond = dyn Fn(&Recorded, &[Recorded]) -> (u16, String) + Send + Sync;

/// Queue stand-in answering every request through `respond`.
struct MockQueue {
    url: String,
    requests: Arc<parking_lot::Mutex<Vec<Recorded>>>,
}

impl MockQueue {
    async fn start(respond: Arc<Respond>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let log = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let Some(request) = read_request(&mut stream).await else {
                    continue;
                };
                let (status, body) = {
                    let mut log = log.lock();
                    let reply = respond(&request, &log);
                    log.push(request);
                    reply
                };
                let _ = stream.write_all(response(status, &body).as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        Self { url, requests }
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }
}

async fn read_request(stream: &mut TcpStream) -> Option<Recorded> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let content_length = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Some(Recorded {
        method,
        path,
        body: String::from_utf8_lossy(&buf[header_end..]).to_string(),
    })
}

fn response(status: u16, body: &str) -> String {
    match status {
        204 => "HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n".to_string(),
        _ => format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            if status == 200 { "OK" } else { "Error" },
            body.len(),
            body
        ),
    }
}

struct BlankRenderer;

impl Renderer for BlankRenderer {
    fn render<'a>(
        &'a self,
        request: RenderRequest<'a>,
        _resources: &'a dyn ResourceSource,
    ) -> BoxFuture<'a, Result<RawImage, RenderError>> {
        Box::pin(async move {
            Ok(RawImage {
                width: request.width * request.ratio,
                height: request.height * request.ratio,
                data: vec![0; request.expected_len()],
            })
        })
    }
}

struct FixedEncoder;

impl TileEncoder for FixedEncoder {
    fn encode(&self, _image: RawImage, _params: &EncodeParams) -> Result<Vec<u8>, EncodeError> {
        Ok(b"tile".to_vec())
    }
}

fn worker(queue_url: &str, store: &TempDir, cancel: CancellationToken) -> Worker {
    let queue = HttpQueueClient::new(queue_url, "tileseed-it").unwrap();
    let config = WorkerConfig::new(store.path()).with_poll_interval(Duration::from_millis(50));
    let services =
        JobServices::new(Arc::new(BlankRenderer), Arc::new(FixedEncoder)).with_cancel(cancel);
    Worker::new(Arc::new(queue), config, services)
}

fn claims(requests: &[Recorded]) -> usize {
    requests
        .iter()
        .filter(|r| r.method == "POST" && r.path == "/api/jobs")
        .count()
}

fn job_payload() -> Value {
    json!({
        "id": "77",
        "details": {
            "tileProvider": "vineyards-tiles",
            "tileSet": "vineyards_day",
            "tileMatrixSet": "WebMercatorQuad",
            "subMatrices": [{ "level": 1, "rowMin": 0, "rowMax": 1, "colMin": 0, "colMax": 1 }],
            "reseed": false,
            "storage": {
                "type": "MBTILES",
                "jobSize": "0",
                "vector": "vector.mbtiles",
                "raster": "raster/day.mbtiles",
                "style": "style.json"
            }
        }
    })
}

// =============================================================================
// Integration Tests
// =============================================================================

#[tokio::test]
async fn test_empty_queue_never_starts_a_job() {
    let store = TempDir::new().unwrap();
    let cancel = CancellationToken::new();

    let stop = cancel.clone();
    let respond: Arc<Respond> = Arc::new(move |_request: &Recorded, seen: &[Recorded]| {
        if claims(seen) + 1 >= 3 {
            stop.cancel();
        }
        (204, String::new())
    });
    let queue = MockQueue::start(respond).await;

    let started = Instant::now();
    let mut worker = worker(&queue.url, &store, cancel);
    let stats = tokio::time::timeout(Duration::from_secs(10), worker.run())
        .await
        .unwrap();

    assert_eq!(stats.jobs, 0);
    assert!(stats.polls >= 3);
    assert!(worker.is_connected());
    assert!(started.elapsed() < Duration::from_secs(5));

    let requests = queue.requests();
    assert_eq!(claims(&requests), requests.len());
    let body: Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(body, json!({ "id": "tileseed-it", "type": JOB_TYPE }));
}

#[tokio::test]
async fn test_claimed_job_is_rendered_and_finished() {
    let store = TempDir::new().unwrap();
    std::fs::write(store.path().join("style.json"), r#"{"version":8}"#).unwrap();
    let cancel = CancellationToken::new();

    let stop = cancel.clone();
    let respond: Arc<Respond> = Arc::new(move |request: &Recorded, seen: &[Recorded]| {
        match (request.method.as_str(), request.path.as_str()) {
            ("POST", "/api/jobs") if claims(seen) == 1 => (200, job_payload().to_string()),
            ("POST", "/api/jobs") => (204, String::new()),
            ("DELETE", _) => {
                stop.cancel();
                (204, String::new())
            }
            _ => (204, String::new()),
        }
    });
    let queue = MockQueue::start(respond).await;

    let mut worker = worker(&queue.url, &store, cancel);
    let stats = tokio::time::timeout(Duration::from_secs(30), worker.run())
        .await
        .unwrap();
    assert_eq!(stats.jobs, 1);
    assert_eq!(stats.failed, 0);

    let requests = queue.requests();
    let progress: Vec<Value> = requests
        .iter()
        .filter(|r| r.method == "POST" && r.path == "/api/jobs/77")
        .map(|r| serde_json::from_str(&r.body).unwrap())
        .collect();
    assert!(!progress.is_empty());
    let delta: u64 = progress.iter().map(|p| p["delta"].as_u64().unwrap()).sum();
    assert_eq!(delta, 4);
    assert_eq!(progress[0]["tileSet"], "vineyards_day");
    assert_eq!(progress[0]["level"], 1);

    let finish = requests
        .iter()
        .find(|r| r.method == "DELETE" && r.path == "/api/jobs/77")
        .unwrap();
    let body: Value = serde_json::from_str(&finish.body).unwrap();
    assert_eq!(body, json!({ "retry": true }));

    let archive = store.path().join("raster/day.mbtiles");
    let handle = ArchiveHandle::open(&archive, ArchiveOpenOptions::read_only()).unwrap();
    assert_eq!(handle.get_tile(&TileCoord::new(1, 1, 1)).unwrap().unwrap(), b"tile");
}

#[tokio::test]
async fn test_unreachable_queue_keeps_polling() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let store = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let mut worker = worker(&url, &store, cancel.clone());

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
    });

    let started = Instant::now();
    let stats = tokio::time::timeout(Duration::from_secs(10), worker.run())
        .await
        .unwrap();
    stopper.await.unwrap();

    assert_eq!(stats.jobs, 0);
    assert!(stats.polls >= 2);
    assert!(!worker.is_connected());
    assert!(started.elapsed() < Duration::from_secs(5));
}
