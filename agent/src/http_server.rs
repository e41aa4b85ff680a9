use std::net::SocketAddr;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use roster_core::types::QueryResponse;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::service::QueryService;

/// Application state shared with all routes
#[derive(Clone)]
pub struct AppState {
    service: QueryService,
}

/// Query parameters or JSON body for `/query`
#[derive(Debug, Default, Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
}

/// Error type for HTTP server
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(detail) => {
                warn!(detail = %detail, "Bad request");
                (StatusCode::BAD_REQUEST, Json(json!({ "detail": detail }))).into_response()
            }
        }
    }
}

/// Build the router with permissive CORS
pub fn build_router(service: QueryService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/query", get(query_get).post(query_post))
        .layer(cors)
        .with_state(AppState { service })
}

/// Start the HTTP server
pub async fn run_server(service: QueryService, addr: SocketAddr) -> anyhow::Result<()> {
    info!("Starting HTTP server on {}", addr);

    axum::Server::bind(&addr)
        .serve(build_router(service).into_make_service())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start HTTP server: {}", e))
}

/// Health check handler
async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

async fn query_get(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> Result<Json<QueryResponse>, ApiError> {
    handle_query(state, params).await
}

async fn query_post(
    State(state): State<AppState>,
    Json(params): Json<QueryParams>,
) -> Result<Json<QueryResponse>, ApiError> {
    handle_query(state, params).await
}

async fn handle_query(state: AppState, params: QueryParams) -> Result<Json<QueryResponse>, ApiError> {
    let query = params
        .query
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Query parameter is required.".to_string()))?;

    let response = state
        .service
        .answer(&query, params.conversation_id.as_deref())
        .await;
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{AgentExecutor, AgentSettings};
    use crate::prompt::PromptComposer;
    use crate::session::InMemoryConversationStore;
    use crate::testing::{FakeDatabase, ScriptedEngine};
    use crate::tools::{ToolSet, ToolSettings, TOOL_CATALOG};
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn router(responses: &[&str]) -> Router {
        let executor = AgentExecutor::new(
            Arc::new(ScriptedEngine::new(responses.iter().copied())),
            ToolSet::new(Arc::new(FakeDatabase::default()), ToolSettings::default()),
            PromptComposer::new(TOOL_CATALOG, 20),
            AgentSettings::default(),
        );
        build_router(QueryService::new(
            executor,
            Arc::new(InMemoryConversationStore::new()),
        ))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = router(&[])
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "status": "healthy" }));
    }

    #[tokio::test]
    async fn test_get_query() {
        let response = router(&["Final Answer: Two tables."])
            .oneshot(
                Request::builder()
                    .uri("/query?query=What%20tables%20exist%3F&conversation_id=abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({
                "conversation_id": "abc",
                "query": "What tables exist?",
                "response": "Two tables.",
                "steps": [],
                "success": true
            })
        );
    }

    #[tokio::test]
    async fn test_post_query() {
        let response = router(&["Action: list_tables\nAction Input:", "Final Answer: Two tables."])
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/query")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"query": "What tables exist?"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["steps"][0]["tool"], json!("list_tables"));
        assert_eq!(body["steps"][0]["output"], json!("departments, employees"));
        assert!(!body["conversation_id"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_query_is_bad_request() {
        for uri in ["/query", "/query?query=", "/query?query=%20%20"] {
            let response = router(&[])
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(
                body_json(response).await,
                json!({ "detail": "Query parameter is required." })
            );
        }
    }
}
