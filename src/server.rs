use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::catalog::ColumnRef;
use crate::classify::Reconciliation;
use crate::discovery::{Discovery, ScanOutcome, ScanRequest};
use crate::error::{DiscoverxError, Result};
use crate::filter::NameFilter;
use crate::interface::CancelToken;
use crate::query::{DeleteReport, SearchReport, TagQuery};
use crate::rules::{Rule, RuleInfo};
use crate::store::PublishOutcome;

#[derive(Debug, Default, Deserialize)]
pub struct RulesQuery {
    #[serde(default)]
    pub filter: String,
}

/// A tag on a column, as named in a review.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnTag {
    pub column: ColumnRef,
    pub tag: String,
}

/// Review applied to the last scan before publishing. Without a body the
/// scan is published as classified.
#[derive(Debug, Default, Deserialize)]
pub struct PublishRequest {
    #[serde(default)]
    pub reject: Vec<ColumnTag>,
    #[serde(default)]
    pub add: Vec<ColumnTag>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    #[serde(flatten)]
    pub query: TagQuery,
    #[serde(default)]
    pub what_if: bool,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub status: String,
    pub error: String,
}

pub struct ApiError {
    status: StatusCode,
    message: String,
}
impl From<DiscoverxError> for ApiError {
    fn from(e: DiscoverxError) -> Self {
        let status = match &e {
            DiscoverxError::InvalidRule { .. } | DiscoverxError::Config(_) => StatusCode::BAD_REQUEST,
            DiscoverxError::NoMatchingColumns { .. } => StatusCode::NOT_FOUND,
            DiscoverxError::NoScan => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, message: e.to_string() }
    }
}
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse { status: "error".into(), error: self.message };
        (self.status, Json(body)).into_response()
    }
}

type Reply<T> = std::result::Result<Json<T>, ApiError>;

fn respond<T>(operation: &'static str, started: Instant, outcome: Result<T>) -> Reply<T> {
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    match outcome {
        Ok(value) => {
            info!(operation, ms = elapsed_ms, "request complete");
            Ok(Json(value))
        }
        Err(e) => {
            let error = ApiError::from(e);
            warn!(operation, ms = elapsed_ms, code = %error.status.as_u16(), msg = %error.message, "request error");
            Err(error)
        }
    }
}

// The operations are synchronous, so they run on a blocking thread.
async fn blocking<T, F>(discovery: &Arc<Discovery>, operation: &'static str, work: F) -> Reply<T>
where
    T: Send + 'static,
    F: FnOnce(&Discovery) -> Result<T> + Send + 'static,
{
    let started = Instant::now();
    let discovery = Arc::clone(discovery);
    let outcome = tokio::task::spawn_blocking(move || work(&discovery))
        .await
        .map_err(|e| {
            warn!(error = %e, "Join error");
            ApiError { status: StatusCode::INTERNAL_SERVER_ERROR, message: "Join error".into() }
        })?;
    respond(operation, started, outcome)
}

pub fn router(discovery: Arc<Discovery>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);
    Router::new()
        .route("/v1/rules", get(list_rules).post(register_rule))
        .route("/v1/scan", post(scan))
        .route("/v1/inspect", get(inspect))
        .route("/v1/publish", post(publish))
        .route("/v1/search", post(search))
        .route("/v1/delete", post(delete))
        .layer(cors)
        .with_state(discovery)
}

async fn list_rules(State(discovery): State<Arc<Discovery>>, Query(query): Query<RulesQuery>) -> Reply<Vec<RuleInfo>> {
    let filter = NameFilter::parse(&query.filter);
    blocking(&discovery, "rules", move |d| {
        Ok(d.list_rules(&filter)?.iter().map(|rule| rule.info()).collect())
    })
    .await
}

async fn register_rule(State(discovery): State<Arc<Discovery>>, Json(info): Json<RuleInfo>) -> Reply<RuleInfo> {
    blocking(&discovery, "register rule", move |d| {
        let rule = d.register_rule(Rule::try_from(info)?)?;
        Ok(rule.info())
    })
    .await
}

async fn scan(State(discovery): State<Arc<Discovery>>, Json(request): Json<ScanRequest>) -> Reply<ScanOutcome> {
    let started = Instant::now();
    let outcome = discovery.scan_parallel(&request, &CancelToken::new()).await;
    respond("scan", started, outcome)
}

async fn inspect(State(discovery): State<Arc<Discovery>>) -> Reply<Reconciliation> {
    blocking(&discovery, "inspect", |d| d.inspect()).await
}

async fn publish(
    State(discovery): State<Arc<Discovery>>,
    request: Option<Json<PublishRequest>>,
) -> Reply<PublishOutcome> {
    let request = request.map(|Json(request)| request).unwrap_or_default();
    blocking(&discovery, "publish", move |d| {
        let mut review = d.inspect()?;
        for rejected in &request.reject {
            if !review.reject(&rejected.column, &rejected.tag) {
                warn!(column = %rejected.column, tag = %rejected.tag, "no such change to reject");
            }
        }
        for added in request.add {
            review.add(added.column, &added.tag);
        }
        d.publish_reviewed(review)
    })
    .await
}

async fn search(State(discovery): State<Arc<Discovery>>, Json(query): Json<TagQuery>) -> Reply<SearchReport> {
    blocking(&discovery, "search", move |d| d.search_by(&query, &CancelToken::new())).await
}

async fn delete(State(discovery): State<Arc<Discovery>>, Json(request): Json<DeleteRequest>) -> Reply<DeleteReport> {
    blocking(&discovery, "delete", move |d| {
        d.delete_by(&request.query, request.what_if, &CancelToken::new())
    })
    .await
}
