//! Request handlers.

use super::error::ApiError;
use super::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use metrix_core::types::MetricUpdate;
use metrix_core::{MetricKind, Metrics, Pingable, Repository};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

/// `POST /update/{kind}/{name}/{value}`
#[instrument(skip(state))]
pub async fn update_by_path(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let kind: MetricKind = kind.parse().map_err(|_| ApiError::NotFound(kind))?;
    let metric = match kind {
        MetricKind::Gauge => Metrics::gauge(&name, parse_value(&value)?),
        MetricKind::Counter => Metrics::counter(&name, parse_value(&value)?),
    };

    apply(state.repo.as_ref(), &metric).await?;
    Ok(StatusCode::OK)
}

/// `POST /update/` with a single JSON metric. Responds with the stored value.
pub async fn update_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Metrics>, ApiError> {
    let metric: Metrics = decode(&body)?;
    debug!(%metric, "JSON update");
    if metric.id.is_empty() {
        return Err(ApiError::NotFound("metric id is empty".into()));
    }

    Ok(Json(apply(state.repo.as_ref(), &metric).await?))
}

/// `POST /updates/` with a JSON array, applied as one batch.
pub async fn update_batch(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Vec<Metrics>>, ApiError> {
    let batch: Vec<Metrics> = decode(&body)?;
    debug!(len = batch.len(), "Batch update");

    Ok(Json(state.repo.update_many(&batch).await?))
}

/// `GET /value/{kind}/{name}`
pub async fn value_by_path(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<String, ApiError> {
    let kind: MetricKind = kind.parse().map_err(|_| ApiError::NotFound(kind))?;
    let value = match kind {
        MetricKind::Gauge => state.repo.get_gauge(&name).await?.to_string(),
        MetricKind::Counter => state.repo.get_counter(&name).await?.to_string(),
    };
    Ok(value)
}

/// `POST /value/` naming a metric; responds with its current value.
pub async fn value_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Metrics>, ApiError> {
    let query: Metrics = decode(&body)?;
    if query.id.is_empty() {
        return Err(ApiError::NotFound("metric id is empty".into()));
    }

    let metric = match query.kind {
        MetricKind::Gauge => Metrics::gauge(&query.id, state.repo.get_gauge(&query.id).await?.0),
        MetricKind::Counter => {
            Metrics::counter(&query.id, state.repo.get_counter(&query.id).await?.0)
        }
    };
    Ok(Json(metric))
}

/// `GET /` lists every metric as `name: value`, as HTML when the client asks for it.
pub async fn list_all(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let lines = state.repo.get_all().await?.lines();

    let wants_html = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"));

    if wants_html {
        let mut page = String::from("<!DOCTYPE html>\n<html><body>\n");
        for line in &lines {
            page.push_str("<p>");
            page.push_str(&escape_html(line));
            page.push_str("</p>\n");
        }
        page.push_str("</body></html>\n");
        return Ok(Html(page).into_response());
    }

    let mut text = lines.join("\n");
    text.push('\n');
    Ok(text.into_response())
}

/// `GET /ping`
pub async fn ping(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.repo.ping().await?;
    Ok(StatusCode::OK)
}

async fn apply(repo: &dyn Repository, metric: &Metrics) -> Result<Metrics, ApiError> {
    let applied = match metric.to_update()? {
        MetricUpdate::Gauge { name, value } => {
            Metrics::gauge(name, repo.update_gauge(name, value).await?.0)
        }
        MetricUpdate::Counter { name, delta } => {
            Metrics::counter(name, repo.update_counter(name, delta).await?.0)
        }
    };
    Ok(applied)
}

fn parse_value<T: std::str::FromStr>(raw: &str) -> Result<T, ApiError> {
    raw.parse().map_err(|_| ApiError::BadRequest(format!("unparsable value {:?}", raw)))
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
