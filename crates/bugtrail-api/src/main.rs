//! bugtrail-api: HTTP API server for the bugtrail issue tracker
//!
//! Thin JSON transport over [`bugtrail_core::Service`]. Streaming reads are
//! drained into a single response body.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bugtrail_core::db::{Category, CategoryNode, NewCategory, NewUser, OrderBy, User, ROOT_CATEGORY};
use bugtrail_core::pagination::Pagination;
use bugtrail_core::service::{
    Direction, GetIssueUpdatesRequest, GetIssuesRequest, IssueQuery, NewIssueRequest,
    UpdateIssueRequest,
};
use bugtrail_core::{Config, Error, Issue, IssueDiff, IssueUpdate, Service};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

/// Buffered chunks between a streaming read and the response collector.
const STREAM_BUFFER: usize = 4;

/// Category tree depth when the caller does not ask for one.
const DEFAULT_TREE_LEVELS: u32 = 1;

/// Shared application state
struct AppState {
    service: Service,
    timeout: Duration,
}

type SharedState = State<Arc<AppState>>;

/// API response wrapper
#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// A service error on its way out as an HTTP response.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

fn status_of(err: &Error) -> StatusCode {
    match err {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::AlreadyExists(_) => StatusCode::CONFLICT,
        Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        Error::FailedPrecondition(_) => StatusCode::PRECONDITION_FAILED,
        Error::Unimplemented(_) => StatusCode::NOT_IMPLEMENTED,
        Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Internal(_) | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        // Client closed request
        Error::Cancelled(_) => StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT),
        Error::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_of(&self.0);
        if status.is_server_error() && !self.0.is_caller_abort() {
            warn!(error = %self.0, "request failed");
        }
        (status, Json(ApiResponse::<()>::err(self.0.to_string()))).into_response()
    }
}

type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::ok(data))))
}

/// Run a streaming read under the request deadline and collect every chunk
/// it sends.
async fn drain<T, F, Fut>(timeout: Duration, run: F) -> bugtrail_core::Result<Vec<T>>
where
    F: FnOnce(mpsc::Sender<T>) -> Fut,
    Fut: Future<Output = bugtrail_core::Result<()>>,
{
    let (tx, mut rx) = mpsc::channel(STREAM_BUFFER);
    Service::with_timeout(timeout, async move {
        let collect = async {
            let mut chunks = Vec::new();
            while let Some(chunk) = rx.recv().await {
                chunks.push(chunk);
            }
            chunks
        };
        let (res, chunks) = tokio::join!(run(tx), collect);
        res.map(|()| chunks)
    })
    .await
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: String,
    #[serde(default)]
    order_by: OrderBy,
    #[serde(default)]
    direction: Direction,
    #[serde(default)]
    after: String,
    #[serde(default)]
    count: i64,
}

impl From<SearchQuery> for GetIssuesRequest {
    fn from(q: SearchQuery) -> Self {
        GetIssuesRequest {
            query: IssueQuery::BySearch(q.q),
            order_by: q.order_by,
            direction: q.direction,
            pagination: Some(Pagination {
                after: q.after,
                count: q.count,
            }),
        }
    }
}

/// Search issues
async fn search_issues(State(state): SharedState, Query(query): Query<SearchQuery>) -> ApiResult<Vec<Issue>> {
    let svc = state.service.clone();
    let req = GetIssuesRequest::from(query);
    let chunks = drain(state.timeout, move |tx| async move { svc.get_issues(req, &tx).await }).await?;
    ok(chunks.into_iter().flat_map(|c| c.issues).collect())
}

/// Get a single issue by id
async fn get_issue(State(state): SharedState, Path(id): Path<i64>) -> ApiResult<Issue> {
    let svc = state.service.clone();
    let req = GetIssuesRequest {
        query: IssueQuery::ById(id),
        order_by: OrderBy::default(),
        direction: Direction::default(),
        pagination: None,
    };
    let chunks = drain(state.timeout, move |tx| async move { svc.get_issues(req, &tx).await }).await?;
    let issue = chunks
        .into_iter()
        .flat_map(|c| c.issues)
        .next()
        .ok_or_else(|| Error::not_found("issue not found"))?;
    ok(issue)
}

#[derive(Debug, Serialize)]
struct Created {
    id: i64,
}

/// File a new issue
async fn create_issue(State(state): SharedState, Json(req): Json<NewIssueRequest>) -> ApiResult<Created> {
    let id = Service::with_timeout(state.timeout, state.service.new_issue(req)).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(Created { id }))))
}

/// Body of `PATCH /issues/{id}`
#[derive(Debug, Deserialize)]
struct UpdateBody {
    author: Uuid,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    diff: Option<IssueDiff>,
}

/// Append an update to an issue
async fn update_issue(
    State(state): SharedState,
    Path(id): Path<i64>,
    Json(body): Json<UpdateBody>,
) -> ApiResult<IssueUpdate> {
    let req = UpdateIssueRequest {
        id,
        author: body.author,
        comment: body.comment,
        diff: body.diff,
    };
    let update = Service::with_timeout(state.timeout, state.service.update_issue(req)).await?;
    ok(update)
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    #[serde(default)]
    after: String,
    #[serde(default)]
    count: i64,
}

#[derive(Debug, Serialize)]
struct IssueHistory {
    issue: Issue,
    updates: Vec<IssueUpdate>,
}

/// An issue together with a page of its history
async fn issue_updates(
    State(state): SharedState,
    Path(id): Path<i64>,
    Query(page): Query<PageQuery>,
) -> ApiResult<IssueHistory> {
    let svc = state.service.clone();
    let req = GetIssueUpdatesRequest {
        id,
        pagination: Some(Pagination {
            after: page.after,
            count: page.count,
        }),
    };
    let chunks = drain(state.timeout, move |tx| async move {
        svc.get_issue_updates(req, &tx).await
    })
    .await?;

    let mut current = None;
    let mut updates = Vec::new();
    for chunk in chunks {
        current = current.or(chunk.current);
        updates.extend(chunk.updates);
    }
    let issue = current.ok_or_else(|| Error::not_found("issue not found"))?;
    ok(IssueHistory { issue, updates })
}

/// Register a user
async fn create_user(State(state): SharedState, Json(new): Json<NewUser>) -> ApiResult<User> {
    let user = Service::with_timeout(state.timeout, state.service.new_user(new)).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(user))))
}

/// Look a user up by username
async fn get_user(State(state): SharedState, Path(username): Path<String>) -> ApiResult<User> {
    let svc = &state.service;
    let user = Service::with_timeout(state.timeout, async {
        let id = svc.resolve_username(&username).await?;
        svc.get_user(id).await
    })
    .await?;
    ok(user)
}

#[derive(Debug, Deserialize)]
struct TreeQuery {
    #[serde(default)]
    levels: Option<u32>,
}

/// A category and its subtree, `levels` deep
async fn category_tree(
    State(state): SharedState,
    Path(id): Path<Uuid>,
    Query(query): Query<TreeQuery>,
) -> ApiResult<CategoryNode> {
    let levels = query.levels.unwrap_or(DEFAULT_TREE_LEVELS);
    let tree = Service::with_timeout(state.timeout, state.service.category_tree(id, levels)).await?;
    ok(tree)
}

/// Create a category
async fn create_category(State(state): SharedState, Json(new): Json<NewCategory>) -> ApiResult<Category> {
    let category = Service::with_timeout(state.timeout, state.service.new_category(new)).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(category))))
}

#[derive(Debug, Deserialize)]
struct CategoryBody {
    parent_id: Uuid,
    name: String,
    #[serde(default)]
    description: String,
}

/// Rename, re-describe or move a category
async fn update_category(
    State(state): SharedState,
    Path(id): Path<Uuid>,
    Json(body): Json<CategoryBody>,
) -> ApiResult<Category> {
    let category = Category {
        id,
        parent_id: Some(body.parent_id),
        name: body.name,
        description: body.description,
    };
    Service::with_timeout(state.timeout, state.service.update_category(&category)).await?;
    ok(category)
}

/// Delete a leaf category
async fn delete_category(State(state): SharedState, Path(id): Path<Uuid>) -> ApiResult<serde_json::Value> {
    Service::with_timeout(state.timeout, state.service.delete_category(id)).await?;
    ok(serde_json::json!({ "deleted": id }))
}

/// The whole category tree from the root
async fn root_tree(State(state): SharedState, Query(query): Query<TreeQuery>) -> ApiResult<CategoryNode> {
    category_tree(State(state), Path(ROOT_CATEGORY), Query(query)).await
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/issues", get(search_issues).post(create_issue))
        .route("/issues/{id}", get(get_issue).patch(update_issue))
        .route("/issues/{id}/updates", get(issue_updates))
        .route("/users", post(create_user))
        .route("/users/{username}", get(get_user))
        .route("/categories", get(root_tree).post(create_category))
        .route("/categories/{id}", axum::routing::put(update_category).delete(delete_category))
        .route("/categories/{id}/tree", get(category_tree))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)),
        )
        .with_state(state)
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::load_default().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    let service = Service::connect(&config.database)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    let state = Arc::new(AppState {
        service,
        timeout: Duration::from_secs(config.api.request_timeout_secs),
    });
    let app = router(state);

    let addr = format!("{}:{}", config.api.host, config.api.port);
    info!("Starting bugtrail-api on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
