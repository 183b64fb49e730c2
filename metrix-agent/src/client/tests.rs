use super::*;
use crate::reporter::Reporter;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use metrix_core::envelope::sign;
use metrix_core::{Gauge, MemoryStorage, Metrics, Repository};
use std::sync::Arc;

/// Minimal collector: opens envelopes and stores gauges.
#[derive(Clone)]
struct Collector {
    storage: Arc<MemoryStorage>,
    key: Option<&'static str>,
    reply_key: Option<&'static str>,
}

impl Collector {
    fn new(key: Option<&'static str>) -> Self {
        Self { storage: Arc::new(MemoryStorage::new()), key, reply_key: key }
    }
}

async fn json_update(
    State(collector): State<Collector>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let envelope = Envelope {
        body: body.to_vec(),
        gzip: headers.get("content-encoding").is_some_and(|v| v == "gzip"),
        signature: headers.get(HASH_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string),
    };
    let Ok(json) = envelope.open(collector.key) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let batch = serde_json::from_slice::<Vec<Metrics>>(&json)
        .or_else(|_| serde_json::from_slice::<Metrics>(&json).map(|metric| vec![metric]));
    let Ok(batch) = batch else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let applied = collector.storage.update_many(&batch).await.unwrap();
    let reply = serde_json::to_vec(&applied).unwrap();
    let mut response = reply.clone().into_response();
    if let Some(key) = collector.reply_key {
        let signature = HeaderValue::from_str(&sign(&reply, key).unwrap()).unwrap();
        response.headers_mut().insert("hashsha256", signature);
    }
    response
}

async fn path_update(
    State(collector): State<Collector>,
    Path((name, value)): Path<(String, String)>,
) -> StatusCode {
    match value.parse::<f64>() {
        Ok(value) => {
            collector.storage.update_gauge(&name, value).await.unwrap();
            StatusCode::OK
        }
        Err(_) => StatusCode::BAD_REQUEST,
    }
}

async fn serve(collector: Collector) -> String {
    let app = Router::new()
        .route("/update/", post(json_update))
        .route("/updates/", post(json_update))
        .route("/update/gauge/:name/:value", post(path_update))
        .with_state(collector);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    address
}

fn batch_job(gzip: bool, key: Option<&str>) -> DeliveryJob {
    let json = serde_json::to_vec(&[Metrics::gauge("Alloc", 512.0)]).unwrap();
    DeliveryJob {
        mode: ReportMode::Batch,
        path: "/updates/".into(),
        envelope: Some(Envelope::seal(json, gzip, key).unwrap()),
    }
}

#[test]
fn test_base_url() {
    let client = MetrixClient::new("localhost:8080", None).unwrap();
    assert_eq!(client.base_url(), "http://localhost:8080");

    let client = MetrixClient::new("http://collector:9090/", None).unwrap();
    assert_eq!(client.base_url(), "http://collector:9090");
}

#[tokio::test]
async fn test_deliver_signed_gzip_batch() {
    let collector = Collector::new(Some("secret"));
    let address = serve(collector.clone()).await;
    let client = MetrixClient::new(&address, Some("secret")).unwrap();

    client.deliver(&batch_job(true, Some("secret"))).await.unwrap();

    assert_eq!(collector.storage.get_gauge("Alloc").await.unwrap(), Gauge(512.0));
}

#[tokio::test]
async fn test_deliver_path_form() {
    let collector = Collector::new(None);
    let address = serve(collector.clone()).await;
    let client = MetrixClient::new(&address, None).unwrap();
    let job = DeliveryJob {
        mode: ReportMode::Path,
        path: "/update/gauge/Frees/7".into(),
        envelope: None,
    };

    client.deliver(&job).await.unwrap();

    assert_eq!(collector.storage.get_gauge("Frees").await.unwrap(), Gauge(7.0));
}

#[tokio::test]
async fn test_rejection_is_not_retried() {
    let collector = Collector::new(Some("secret"));
    let address = serve(collector.clone()).await;
    let client = MetrixClient::new(&address, Some("wrong")).unwrap();
    let started = std::time::Instant::now();

    let err = client.deliver(&batch_job(false, Some("wrong"))).await.unwrap_err();

    assert!(matches!(&err, DeliveryError::Rejected { status, .. } if status.as_u16() == 400));
    assert!(!err.is_retriable());
    assert!(started.elapsed() < std::time::Duration::from_secs(1));
    assert!(collector.storage.get_gauge("Alloc").await.is_err());
}

#[tokio::test]
async fn test_bad_response_signature() {
    let collector = Collector { reply_key: Some("other"), ..Collector::new(Some("secret")) };
    let address = serve(collector).await;
    let client = MetrixClient::new(&address, Some("secret")).unwrap();

    let err = client.deliver(&batch_job(false, Some("secret"))).await.unwrap_err();

    assert!(matches!(err, DeliveryError::BadSignature));
}

#[tokio::test]
async fn test_connection_refused_is_retried() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let waits = [std::time::Duration::from_millis(10); 2];
    let client = MetrixClient::new(&address, None).unwrap().with_backoff(Backoff::new(waits));

    let err = client.deliver(&batch_job(false, None)).await.unwrap_err();

    assert!(matches!(err, DeliveryError::Transport(_)));
    assert!(err.is_retriable());
    assert_eq!(err.reason(), "transport");
}

#[tokio::test]
async fn test_pool_drains_queue_on_shutdown() {
    let collector = Collector::new(None);
    let address = serve(collector.clone()).await;
    let client = Arc::new(MetrixClient::new(&address, None).unwrap());
    let pool = DeliveryPool::spawn(client, 3);

    let snapshot = Arc::new(MemoryStorage::with_gauges(["Alloc", "Frees"]));
    snapshot.update_gauge("Alloc", 2.5).await.unwrap();
    let reporter = Reporter::new(snapshot, ReportMode::Json, true, None);

    let queue = pool.sender();
    assert!(reporter.report_once(&queue).await);
    queue
        .send(DeliveryJob { mode: ReportMode::Path, path: "/missing".into(), envelope: None })
        .await
        .unwrap();
    drop(queue);

    assert_eq!(pool.shutdown().await, 1);
    assert_eq!(collector.storage.get_gauge("Alloc").await.unwrap(), Gauge(2.5));
    assert_eq!(collector.storage.get_gauge("Frees").await.unwrap(), Gauge(0.0));
}
