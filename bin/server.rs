// Balance Reset Engine - Web Server
// Admin REST API with Axum; the hourly scheduler starts on boot

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use balance_reset::{
    init_tracing, AdminService, EnvConfig, MigrationAction, ResetError, ResetExecutor, Scheduler,
    SqliteStore, StartOutcome, SystemClock, AVAILABLE_ACTIONS,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    admin: AdminService,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<serde_json::Value> {
    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// POST /api/v1/users/reset-balances body
///
/// Fields are read one by one so a bad `force` never hides `userId`.
#[derive(Debug, Default, PartialEq)]
struct ResetRequest {
    user_id: Option<String>,
    force: bool,
}

impl ResetRequest {
    fn from_body(body: &serde_json::Value) -> Self {
        let user_id = match body.get("userId") {
            Some(serde_json::Value::String(id)) if !id.is_empty() => Some(id.clone()),
            Some(serde_json::Value::Number(n)) if n.as_f64() != Some(0.0) => Some(n.to_string()),
            _ => None,
        };

        ResetRequest {
            user_id,
            force: body.get("force").is_some_and(is_truthy),
        }
    }
}

/// POST /api/v1/users/migrate body
#[derive(Debug, Default)]
struct MigrateRequest {
    action: String,
    value: Option<serde_json::Value>,
}

impl MigrateRequest {
    fn from_body(body: &serde_json::Value) -> Self {
        MigrateRequest {
            action: body
                .get("action")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string(),
            value: body.get("value").filter(|v| !v.is_null()).cloned(),
        }
    }
}

#[derive(Serialize)]
struct SingleResetResponse {
    message: String,
    user_id: String,
    new_balance: rust_decimal::Decimal,
}

/// Missing or malformed bodies are treated as `{}`
fn parse_body(body: &Bytes) -> serde_json::Value {
    match serde_json::from_slice(body) {
        Ok(value @ serde_json::Value::Object(_)) => value,
        _ => serde_json::Value::Object(serde_json::Map::new()),
    }
}

/// JSON truthiness: false, 0, "" and null are false
fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => true,
    }
}

fn error_response(err: ResetError) -> Response {
    let status = match &err {
        ResetError::NotFound(_) => StatusCode::NOT_FOUND,
        ResetError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ResetError::DefaultNotConfigured(_) => StatusCode::CONFLICT,
        ResetError::Storage(_) | ResetError::Corrupt(_) | ResetError::Task(_) => {
            error!(error = %err, "admin request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    (status, Json(ApiResponse::err(err.to_string()))).into_response()
}

/// Run a blocking admin call off the async executor
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ResetError>
where
    T: Send + 'static,
    F: FnOnce(AdminService) -> Result<T, ResetError> + Send + 'static,
{
    let admin = state.admin.clone();
    tokio::task::spawn_blocking(move || f(admin)).await?
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/v1/users - Live accounts
async fn list_accounts(State(state): State<AppState>) -> Response {
    match blocking(&state, |admin| admin.accounts()).await {
        Ok(accounts) => (StatusCode::OK, Json(ApiResponse::ok(accounts))).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/v1/users/reset-balances - Reset status and configuration
async fn reset_status(State(state): State<AppState>) -> Response {
    match blocking(&state, |admin| admin.status()).await {
        Ok(status) => (StatusCode::OK, Json(ApiResponse::ok(status))).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/v1/users/reset-balances - Single account, forced, or conditional reset
async fn reset_balances(State(state): State<AppState>, body: Bytes) -> Response {
    let request = ResetRequest::from_body(&parse_body(&body));

    if let Some(user_id) = request.user_id {
        let id = user_id.clone();
        return match blocking(&state, move |admin| admin.reset_one(&id)).await {
            Ok(new_balance) => Json(ApiResponse::ok(SingleResetResponse {
                message: format!("Balance reset for user {}", user_id),
                user_id,
                new_balance,
            }))
            .into_response(),
            Err(e) => error_response(e),
        };
    }

    let force = request.force;
    match blocking(&state, move |admin| admin.perform_reset(force)).await {
        Ok(report) => Json(ApiResponse {
            success: report.performed,
            data: Some(report),
            error: None,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/v1/users/migrate - Default balance migrations
async fn migrate(State(state): State<AppState>, body: Bytes) -> Response {
    let request = MigrateRequest::from_body(&parse_body(&body));
    let action_name = request.action;

    let action = match MigrationAction::parse(&action_name, request.value.as_ref()) {
        Ok(action) => action,
        Err(_) if !AVAILABLE_ACTIONS.contains(&action_name.as_str()) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "success": false,
                    "error": format!(
                        "Unknown action. Available actions: {}",
                        AVAILABLE_ACTIONS.join(", ")
                    ),
                    "available_actions": AVAILABLE_ACTIONS,
                })),
            )
                .into_response();
        }
        Err(e) => return error_response(e),
    };

    match action {
        MigrationAction::Status => match blocking(&state, |admin| admin.migration_status()).await {
            Ok(status) => Json(ApiResponse::ok(status)).into_response(),
            Err(e) => error_response(e),
        },
        MigrationAction::Apply(kind) => {
            match blocking(&state, move |admin| admin.apply_default_migration(kind)).await {
                Ok(report) => Json(ApiResponse::ok(report)).into_response(),
                Err(e) => error_response(e),
            }
        }
    }
}

fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/v1/users", get(list_accounts))
        .route("/v1/users/reset-balances", get(reset_status).post(reset_balances))
        .route("/v1/users/migrate", post(migrate))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    )
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use anyhow::Context;

    init_tracing();

    let db_path = std::env::var("BALANCE_DB_PATH").unwrap_or_else(|_| "balances.db".to_string());
    let store = SqliteStore::open(std::path::Path::new(&db_path))
        .with_context(|| format!("Failed to open database {:?}", db_path))?;
    info!(path = %db_path, "database opened");

    let executor = ResetExecutor::new(Arc::new(store));
    let scheduler = Arc::new(Scheduler::new(
        executor.clone(),
        Arc::new(EnvConfig),
        Arc::new(SystemClock),
    ));

    match scheduler.start() {
        StartOutcome::Started { reset_day } => info!(reset_day, "auto-reset scheduler running"),
        StartOutcome::Disabled => info!("auto-reset disabled, scheduler not started"),
        StartOutcome::AlreadyRunning => {}
    }

    let admin = AdminService::new(executor, Arc::new(EnvConfig), Arc::new(SystemClock))
        .with_scheduler(Arc::clone(&scheduler));
    let app = build_router(AppState { admin });

    let addr = std::env::var("BALANCE_SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    println!("🚀 Server running on http://{}", addr);
    println!("   Status: GET  /api/v1/users/reset-balances");
    println!("   Reset:  POST /api/v1/users/reset-balances");
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("Server error")?;

    scheduler.stop();
    Ok(())
}
