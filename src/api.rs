// 🌐 REST API - Axum router, handlers and shared state
//
// Every /api route except auth, health and sectors requires a bearer token.
// The SQLite mutex is only held inside synchronous sections.

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::{header, HeaderValue, Method, StatusCode},
    response::{Html, IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::auth::{self, CurrentUser, LoginRequest, LoginResponse, RegisterRequest, SessionKeys, SessionStatus};
use crate::categorize::DocumentKind;
use crate::config::Config;
use crate::dashboard::{self, FilterParams, ManualEntry, Summary};
use crate::db::{self, RawOcrRecord, SharedConnection, Transaction};
use crate::entities::Sector;
use crate::errors::Error;
use crate::ocr::ImageUpload;
use crate::pipeline::{ReceiptPipeline, UploadResult};

/// Room for multipart boundaries and headers on top of the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: SharedConnection,
    pub config: Arc<Config>,
    pub sessions: Arc<SessionKeys>,
    pub pipeline: Arc<ReceiptPipeline>,
}

impl AppState {
    pub fn new(db: SharedConnection, config: Config, pipeline: ReceiptPipeline) -> anyhow::Result<Self> {
        let sessions = SessionKeys::new(config.jwt_secret()?, config.auth.token_ttl);

        Ok(AppState {
            db,
            config: Arc::new(config),
            sessions: Arc::new(sessions),
            pipeline: Arc::new(pipeline),
        })
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    ocr: String,
    categorizer: String,
}

#[derive(Serialize)]
struct RegisterResponse {
    message: &'static str,
    user_id: String,
}

#[derive(Deserialize)]
struct SessionQuery {
    token: String,
}

/// A transaction plus the OCR evidence it came from
#[derive(Serialize)]
struct TransactionDetail {
    transaction: Transaction,
    raw_ocr: Option<RawOcrRecord>,
}

fn json_error(rejection: JsonRejection) -> Error {
    Error::bad_request(rejection.body_text())
}

fn query_error(rejection: QueryRejection) -> Error {
    Error::bad_request(rejection.body_text())
}

/// Run CPU-bound work (password hashing) off the async workers
async fn blocking<T, F>(work: F) -> Result<T, Error>
where
    F: FnOnce() -> Result<T, Error> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Other(e.into()))?
}

// ============================================================================
// Auth Handlers
// ============================================================================

/// GET /api/health
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: crate::VERSION,
        ocr: state.pipeline.ocr_name().to_string(),
        categorizer: state.pipeline.categorizer_name().to_string(),
    })
}

/// POST /api/auth/register
async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), Error> {
    let Json(request) = payload.map_err(json_error)?;
    let db = state.db.clone();

    let user = blocking(move || auth::register(&db, &request)).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully",
            user_id: user.id,
        }),
    ))
}

/// POST /api/auth/login
async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, Error> {
    let Json(request) = payload.map_err(json_error)?;
    let db = state.db.clone();
    let sessions = state.sessions.clone();

    let response = blocking(move || auth::login(&db, &sessions, &request)).await?;
    Ok(Json(response))
}

/// GET /api/auth/session?token=...
async fn check_session(
    State(state): State<AppState>,
    query: Result<Query<SessionQuery>, QueryRejection>,
) -> Result<Json<SessionStatus>, Error> {
    let Query(query) = query.map_err(query_error)?;
    Ok(Json(auth::check_session(&state.db, &state.sessions, &query.token)?))
}

// ============================================================================
// Upload Handlers
// ============================================================================

/// Pull the `file` field out of a multipart body and check it is an image
async fn read_upload(mut multipart: Multipart, limit: usize) -> Result<ImageUpload, Error> {
    let multipart_error = |e: MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Error::PayloadTooLarge { limit }
        } else {
            Error::bad_request(format!("Failed to parse multipart data: {}", e.body_text()))
        }
    };

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let mut bytes = Vec::new();

        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            if bytes.len() + chunk.len() > limit {
                warn!(limit, "Upload size limit exceeded");
                return Err(Error::PayloadTooLarge { limit });
            }
            bytes.extend_from_slice(&chunk);
        }

        if bytes.is_empty() {
            return Err(Error::bad_request("Uploaded file is empty"));
        }

        debug!(file_name = ?file_name, size = bytes.len(), "Received upload");

        return ImageUpload::from_bytes(bytes, file_name).ok_or_else(|| Error::UnsupportedMediaType {
            message: "Only JPEG and PNG images are supported".to_string(),
        });
    }

    Err(Error::bad_request("Missing 'file' field"))
}

async fn analyze(
    state: AppState,
    user: CurrentUser,
    multipart: Result<Multipart, MultipartRejection>,
    kind: DocumentKind,
) -> Result<(StatusCode, Json<UploadResult>), Error> {
    let multipart = multipart.map_err(|e| Error::bad_request(e.body_text()))?;
    let image = read_upload(multipart, state.config.max_upload_bytes).await?;

    let result = state.pipeline.process(&state.db, &user.id, image, kind).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// POST /api/analyze-expense - receipt photo
async fn analyze_expense(
    State(state): State<AppState>,
    user: CurrentUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadResult>), Error> {
    analyze(state, user, multipart, DocumentKind::Receipt).await
}

/// POST /api/analyze-transaction - bank SMS screenshot
async fn analyze_transaction(
    State(state): State<AppState>,
    user: CurrentUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadResult>), Error> {
    analyze(state, user, multipart, DocumentKind::Sms).await
}

// ============================================================================
// Dashboard Handlers
// ============================================================================

fn load_transactions(state: &AppState, user: &CurrentUser, params: FilterParams) -> Result<Vec<Transaction>, Error> {
    let filter = params.into_filter()?;
    let conn = db::lock(&state.db)?;
    Ok(db::query_transactions(&conn, &user.id, &filter)?)
}

/// GET /api/transactions
async fn list_transactions(
    State(state): State<AppState>,
    user: CurrentUser,
    params: Result<Query<FilterParams>, QueryRejection>,
) -> Result<Json<Vec<Transaction>>, Error> {
    let Query(params) = params.map_err(query_error)?;
    Ok(Json(load_transactions(&state, &user, params)?))
}

/// POST /api/transactions - manual entry
async fn create_transaction(
    State(state): State<AppState>,
    user: CurrentUser,
    payload: Result<Json<ManualEntry>, JsonRejection>,
) -> Result<(StatusCode, Json<Transaction>), Error> {
    let Json(entry) = payload.map_err(json_error)?;
    let tx = state.pipeline.record_manual(&state.db, &user.id, entry).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

/// GET /api/transactions/:id
async fn get_transaction(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<TransactionDetail>, Error> {
    let conn = db::lock(&state.db)?;

    let transaction = db::get_transaction(&conn, &user.id, &id)?.ok_or_else(|| Error::not_found("Transaction", &id))?;
    let raw_ocr = match &transaction.raw_ocr_id {
        Some(raw_ocr_id) => db::get_raw_ocr_record(&conn, raw_ocr_id)?,
        None => None,
    };

    Ok(Json(TransactionDetail { transaction, raw_ocr }))
}

/// GET /api/export/transactions.csv
async fn export_transactions(
    State(state): State<AppState>,
    user: CurrentUser,
    params: Result<Query<FilterParams>, QueryRejection>,
) -> Result<impl IntoResponse, Error> {
    let Query(params) = params.map_err(query_error)?;
    let transactions = load_transactions(&state, &user, params)?;
    let body = dashboard::export_csv(&transactions)?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"transactions.csv\""),
        ],
        body,
    ))
}

/// GET /api/dashboard/summary
async fn dashboard_summary(
    State(state): State<AppState>,
    user: CurrentUser,
    params: Result<Query<FilterParams>, QueryRejection>,
) -> Result<Json<Summary>, Error> {
    let Query(params) = params.map_err(query_error)?;
    let transactions = load_transactions(&state, &user, params)?;
    Ok(Json(dashboard::summarize(&transactions)))
}

/// GET /api/sectors
async fn list_sectors() -> Json<Vec<&'static str>> {
    Json(Sector::ALL.iter().map(Sector::as_str).collect())
}

/// GET / - Serve index.html
async fn serve_index() -> impl IntoResponse {
    Html(include_str!("../web/index.html"))
}

// ============================================================================
// Router
// ============================================================================

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.iter().any(|origin| origin == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

pub fn router(state: AppState) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.config.max_upload_bytes + MULTIPART_OVERHEAD);

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/session", get(check_session))
        .route("/analyze-expense", post(analyze_expense).layer(upload_limit.clone()))
        .route("/analyze-transaction", post(analyze_transaction).layer(upload_limit))
        .route("/transactions", get(list_transactions).post(create_transaction))
        .route("/transactions/:id", get(get_transaction))
        .route("/export/transactions.csv", get(export_transactions))
        .route("/dashboard/summary", get(dashboard_summary))
        .route("/sectors", get(list_sectors));

    Router::new()
        .route("/", get(serve_index))
        .nest("/api", api_routes)
        .nest_service("/static", ServeDir::new("web"))
        .layer(cors_layer(&state.config.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categorize::RuleCategorizer;
    use crate::ocr::StaticOcr;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use rusqlite::Connection;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const BOUNDARY: &str = "receipt-boundary";
    const PNG: [u8; 12] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];
    const RECEIPT: &str = "LULU HYPERMARKET\n05/01/2025\nMilk 1.200\nBread 0.450\nTOTAL BHD 1.650";

    fn app() -> Router {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();

        let mut config = Config::default();
        config.auth.jwt_secret = Some("test-secret".to_string());
        config.max_upload_bytes = 1024;

        let pipeline = ReceiptPipeline::new(
            Arc::new(StaticOcr::from_text(RECEIPT)),
            Arc::new(RuleCategorizer::new()),
            "BHD",
        );

        router(AppState::new(db::shared(conn), config, pipeline).unwrap())
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = send(app, request).await;
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_authed(uri: &str, token: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap()
    }

    fn upload(uri: &str, token: &str, field: &str, bytes: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"receipt.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::post(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn signup(app: &Router, email: &str) -> String {
        let (status, body) = send_json(
            app,
            post_json(
                "/api/auth/register",
                None,
                json!({"email": email, "password": "longenough", "first_name": "Sara", "last_name": "Ali"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["user_id"].is_string());

        let (status, body) = send_json(
            app,
            post_json("/api/auth/login", None, json!({"email": email, "password": "longenough"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["access_token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_auth_flow() {
        let app = app();
        let token = signup(&app, "sara@example.com").await;

        let (status, body) = send_json(
            &app,
            Request::get(format!("/api/auth/session?token={}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], true);
        assert_eq!(body["user"]["email"], "sara@example.com");
        assert!(body["user"].get("password_hash").is_none());

        let (status, _) = send_json(
            &app,
            post_json("/api/auth/login", None, json!({"email": "sara@example.com", "password": "wrong-password"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send_json(
            &app,
            post_json(
                "/api/auth/register",
                None,
                json!({"email": "sara@example.com", "password": "longenough"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_protected_routes_need_token() {
        let app = app();

        let (status, body) = send_json(&app, Request::get("/api/transactions").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        let (status, _) = send_json(&app, get_authed("/api/transactions", "not-a-token")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_receipt_upload_and_detail() {
        let app = app();
        let token = signup(&app, "sara@example.com").await;

        let (status, body) = send_json(&app, upload("/api/analyze-expense", &token, "file", &PNG)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["document_kind"], "receipt");
        assert_eq!(body["transactions"][0]["vendor"], "LULU HYPERMARKET");
        assert_eq!(body["transactions"][0]["sector"], "Groceries & Household Supplies");
        assert_eq!(body["transactions"][0]["total"], 1.65);
        assert!(body["raw_data"]["ocr_text"].as_str().unwrap().contains("TOTAL"));

        let id = body["transactions"][0]["id"].as_str().unwrap().to_string();

        let (status, detail) = send_json(&app, get_authed(&format!("/api/transactions/{}", id), &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["transaction"]["id"], id.as_str());
        assert_eq!(detail["raw_ocr"]["id"], body["raw_data"]["raw_ocr_id"]);

        let other = signup(&app, "other@example.com").await;
        let (status, _) = send_json(&app, get_authed(&format!("/api/transactions/{}", id), &other)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_upload_rejections() {
        let app = app();
        let token = signup(&app, "sara@example.com").await;

        let (status, _) = send_json(&app, upload("/api/analyze-expense", &token, "file", b"%PDF-1.4 not an image")).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let (status, _) = send_json(&app, upload("/api/analyze-expense", &token, "photo", &PNG)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send_json(&app, upload("/api/analyze-transaction", &token, "file", b"")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut large = PNG.to_vec();
        large.resize(4096, 0);
        let (status, _) = send_json(&app, upload("/api/analyze-expense", &token, "file", &large)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_manual_entry_history_and_export() {
        let app = app();
        let token = signup(&app, "sara@example.com").await;

        for (vendor, date, total, sector) in [
            ("Costa Coffee", "2025-02-03", 1.9, "Dining & Cafés"),
            ("Batelco", "2025-02-10", 12.0, "utilities & bills"),
            ("Carrefour", "2025-03-01", 25.5, "Groceries & Household Supplies"),
        ] {
            let (status, _) = send_json(
                &app,
                post_json(
                    "/api/transactions",
                    Some(&token),
                    json!({"vendor": vendor, "date": date, "total": total, "sector": sector}),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, _) = send_json(
            &app,
            post_json(
                "/api/transactions",
                Some(&token),
                json!({"vendor": "X", "date": "2025-02-03", "total": 1.0, "sector": "Lottery"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, list) = send_json(&app, get_authed("/api/transactions?from=2025-02-01&to=2025-02-28", &token)).await;
        assert_eq!(status, StatusCode::OK);
        let list = list.as_array().unwrap().clone();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["vendor"], "Batelco");
        assert_eq!(list[0]["transaction_type"], "manual");

        let (status, csv) = send(&app, get_authed("/api/export/transactions.csv?from=2025-02-01&to=2025-02-28", &token)).await;
        assert_eq!(status, StatusCode::OK);
        let csv = String::from_utf8(csv).unwrap();
        let rows: Vec<&str> = csv.lines().skip(1).collect();
        assert_eq!(rows.len(), list.len());
        for (row, tx) in rows.iter().zip(&list) {
            assert!(row.starts_with(tx["id"].as_str().unwrap()));
        }

        let (status, summary) = send_json(&app, get_authed("/api/dashboard/summary", &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["transaction_count"], 3);
        assert_eq!(summary["totals_by_currency"]["BHD"], 39.4);
        assert_eq!(summary["by_month"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sectors_and_index() {
        let app = app();

        let (status, sectors) = send_json(&app, Request::get("/api/sectors").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(sectors.as_array().unwrap().len(), 15);

        let (status, html) = send(&app, Request::get("/").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(html).unwrap().contains("<html"));
    }
}
