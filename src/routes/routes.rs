//! Defines the HTTP surface.
//!
//! - `POST /fileupload`           verify, store, tokenize and optionally relay an upload
//! - `GET|HEAD /{container}/{*key}` token-guarded object read
//! - `GET /orders?item=`          stock lookup
//! - `POST /orders`               place an order
//! - `POST /accounts`             register a user
//! - `GET /healthz`, `GET /readyz`
//!
//! The wildcard `*key` allows nested keys.

use crate::{
    handlers::{
        account_handlers::create_account,
        health_handlers::{healthz, readyz},
        object_handlers::{get_object, head_object},
        order_handlers::{get_stock, place_order},
        upload_handlers::upload_file,
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the router; uploads larger than `max_upload_bytes` are refused with 413.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/fileupload",
            post(upload_file).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/orders", get(get_stock).post(place_order))
        .route("/accounts", post(create_account))
        .route("/{container}/{*key}", get(get_object).head(head_object))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{AppConfig, Args},
        db::test_pool,
        handlers::upload_handlers::{DOWNSTREAM_ACCEPTED_HEADER, TOKEN_EXPIRES_HEADER},
        models::object::ObjectAddress,
        services::reconcile::OrphanLedger,
    };
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use clap::Parser;
    use sqlx::SqlitePool;
    use std::{collections::HashMap, sync::Arc};
    use tempfile::TempDir;
    use tower::ServiceExt;

    const PUBLIC_URL: &str = "http://files.test";
    const PAYLOAD: &[u8] = br#"{"order": 42, "items": ["a", "b"]}"#;

    struct TestApp {
        router: Router,
        state: AppState,
        db: Arc<SqlitePool>,
        _dir: TempDir,
    }

    async fn test_app(forward_url: Option<String>) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(test_pool().await);

        let mut vars: HashMap<String, String> = HashMap::from([
            (
                "COURIER_STORAGE_DIR".to_string(),
                dir.path().to_string_lossy().into_owned(),
            ),
            (
                "COURIER_ACCOUNT_KEY".to_string(),
                "test-account-key-0123456789".to_string(),
            ),
            ("COURIER_PUBLIC_URL".to_string(), PUBLIC_URL.to_string()),
            ("COURIER_MAX_UPLOAD_BYTES".to_string(), "4096".to_string()),
            ("COURIER_BCRYPT_COST".to_string(), "4".to_string()),
        ]);
        if let Some(url) = forward_url {
            vars.insert("COURIER_FORWARD_URL".to_string(), url);
        }
        let (cfg, _) = AppConfig::resolve(Args::parse_from(["blob-courier"]), |name| {
            vars.get(name).cloned()
        })
        .unwrap();

        let state = AppState::from_config(&cfg, db.clone()).unwrap();
        TestApp {
            router: routes(cfg.max_upload_bytes).with_state(state.clone()),
            state,
            db,
            _dir: dir,
        }
    }

    fn upload_request(field: &str, filename: &str, content: &[u8]) -> Request<Body> {
        let boundary = "courier-test-boundary";
        let mut body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/fileupload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn object_count(db: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM objects")
            .fetch_one(db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn upload_returns_fetch_url_that_serves_the_payload() {
        let app = test_app(None).await;

        let response = app
            .router
            .clone()
            .oneshot(upload_request("file", "Quarterly Report.json", PAYLOAD))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(DOWNSTREAM_ACCEPTED_HEADER).is_none());
        let expires = response.headers()[TOKEN_EXPIRES_HEADER]
            .to_str()
            .unwrap()
            .to_string();
        let url = body_text(response).await;
        assert!(url.contains(&format!("se={expires}")), "{url}");

        let path_and_query = url.strip_prefix(PUBLIC_URL).unwrap();
        let (path, query) = path_and_query.split_once('?').unwrap();
        let key = path.strip_prefix("/uploads/").unwrap();
        assert!(key.starts_with("Quarterly_Report-"), "{key}");
        assert!(key.ends_with(".json"));
        for param in ["sp=r", "st=", "se=", "sr=b", "sig="] {
            assert!(query.contains(param), "{param} missing from {query}");
        }

        let fetched = app.router.clone().oneshot(get(path_and_query)).await.unwrap();
        assert_eq!(fetched.status(), StatusCode::OK);
        assert_eq!(
            fetched.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        assert_eq!(body_text(fetched).await.as_bytes(), PAYLOAD);

        let head = Request::builder()
            .method("HEAD")
            .uri(path_and_query)
            .body(Body::empty())
            .unwrap();
        let head = app.router.oneshot(head).await.unwrap();
        assert_eq!(head.status(), StatusCode::OK);
        assert_eq!(
            head.headers()[header::CONTENT_LENGTH],
            PAYLOAD.len().to_string().as_str()
        );
    }

    #[tokio::test]
    async fn very_long_filenames_are_stored() {
        let app = test_app(None).await;
        for len in [260, 1100] {
            let name = format!("{}.json", "a".repeat(len));
            let response = app
                .router
                .clone()
                .oneshot(upload_request("file", &name, br#"{"a":1}"#))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "base length {len}");
            let url = body_text(response).await;
            let key = url.split_once('?').unwrap().0.rsplit('/').next().unwrap();
            assert!(key.len() <= 255, "{key}");
        }
        assert_eq!(object_count(&app.db).await, 2);
    }

    #[tokio::test]
    async fn mismatched_content_is_rejected_before_storage() {
        let app = test_app(None).await;

        let response = app
            .router
            .clone()
            .oneshot(upload_request("file", "data.json", b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("not a valid"));

        let response = app
            .router
            .oneshot(upload_request("file", "notes.txt", b"{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("Only .json files are accepted"));

        assert_eq!(object_count(&app.db).await, 0);
    }

    #[tokio::test]
    async fn upload_without_file_field_is_bad_request() {
        let app = test_app(None).await;
        let response = app
            .router
            .oneshot(upload_request("attachment", "data.json", PAYLOAD))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("No file uploaded"));
    }

    #[tokio::test]
    async fn oversized_upload_is_refused() {
        let app = test_app(None).await;
        let mut big = b"[".to_vec();
        big.extend(std::iter::repeat_n(b'1', 8192));
        big.push(b']');
        let response = app
            .router
            .oneshot(upload_request("file", "big.json", &big))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(object_count(&app.db).await, 0);
    }

    #[tokio::test]
    async fn downstream_acceptance_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let hook = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_body(std::str::from_utf8(PAYLOAD).unwrap())
            .with_status(202)
            .create_async()
            .await;
        let app = test_app(Some(format!("{}/hook", server.url()))).await;

        let response = app
            .router
            .oneshot(upload_request("file", "event.json", PAYLOAD))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[DOWNSTREAM_ACCEPTED_HEADER], "true");
        hook.assert_async().await;
    }

    #[tokio::test]
    async fn downstream_refusal_is_server_error_and_recorded() {
        let mut server = mockito::Server::new_async().await;
        let hook = server
            .mock("POST", "/hook")
            .with_status(200)
            .create_async()
            .await;
        let app = test_app(Some(format!("{}/hook", server.url()))).await;

        let response = app
            .router
            .oneshot(upload_request("file", "event.json", PAYLOAD))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("Failed to process the upload"));
        hook.assert_async().await;

        assert_eq!(object_count(&app.db).await, 1);
        let orphans = OrphanLedger::new(app.db.clone()).list().await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].stage, "tokenized");
    }

    #[tokio::test]
    async fn fetch_refuses_bad_tokens_and_reports_missing_objects() {
        let app = test_app(None).await;

        let response = app
            .router
            .clone()
            .oneshot(upload_request("file", "a.json", PAYLOAD))
            .await
            .unwrap();
        let url = body_text(response).await;
        let path_and_query = url.strip_prefix(PUBLIC_URL).unwrap();

        let tampered = format!("{}x", path_and_query);
        let response = app.router.clone().oneshot(get(&tampered)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let (path, _) = path_and_query.split_once('?').unwrap();
        let response = app.router.clone().oneshot(get(path)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let missing = ObjectAddress::new("uploads", "never-stored.json");
        let token = app
            .state
            .issuer
            .issue(&missing, chrono::Duration::hours(1))
            .await
            .unwrap();
        let uri = token.fetch_url("");
        let response = app.router.oneshot(get(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn orders_follow_stock() {
        let app = test_app(None).await;
        sqlx::query("INSERT INTO inventory (item_name, stock) VALUES ('widget', 5)")
            .execute(&*app.db)
            .await
            .unwrap();

        let stock = app.router.clone().oneshot(get("/orders?item=widget")).await.unwrap();
        assert_eq!(stock.status(), StatusCode::OK);
        assert_eq!(body_text(stock).await, "5");

        let order = |body: &'static str| {
            Request::builder()
                .method("POST")
                .uri("/orders")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap()
        };

        let placed = app
            .router
            .clone()
            .oneshot(order(r#"{"item": "widget", "quantity": "2"}"#))
            .await
            .unwrap();
        assert_eq!(placed.status(), StatusCode::OK);
        assert_eq!(body_text(placed).await, "Order for widget placed successfully");

        let cases = [
            (r#"{"item": "widget", "quantity": 10}"#, StatusCode::CONFLICT),
            (r#"{"item": "gizmo", "quantity": 1}"#, StatusCode::NOT_FOUND),
            (r#"{"item": "widget", "quantity": 0}"#, StatusCode::BAD_REQUEST),
            (r#"{"item": "widget"}"#, StatusCode::BAD_REQUEST),
            ("not json", StatusCode::BAD_REQUEST),
        ];
        for (body, expected) in cases {
            let response = app.router.clone().oneshot(order(body)).await.unwrap();
            assert_eq!(response.status(), expected, "{body}");
        }

        let stock = app.router.clone().oneshot(get("/orders?item=widget")).await.unwrap();
        assert_eq!(body_text(stock).await, "3");
        let missing = app.router.clone().oneshot(get("/orders?item=gizmo")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let no_param = app.router.oneshot(get("/orders")).await.unwrap();
        assert_eq!(no_param.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn accounts_are_created_once() {
        let app = test_app(None).await;
        let register = |body: &'static str| {
            Request::builder()
                .method("POST")
                .uri("/accounts")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap()
        };

        let created = app
            .router
            .clone()
            .oneshot(register(r#"{"username": "ada", "password": "correct horse"}"#))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        assert_eq!(body_text(created).await, "User ada created successfully!");

        let cases = [
            (r#"{"username": "ada", "password": "again"}"#, StatusCode::CONFLICT),
            (r#"{"username": "grace"}"#, StatusCode::BAD_REQUEST),
            (r#"{"password": "secret"}"#, StatusCode::BAD_REQUEST),
            ("not json", StatusCode::BAD_REQUEST),
        ];
        for (body, expected) in cases {
            let response = app.router.clone().oneshot(register(body)).await.unwrap();
            assert_eq!(response.status(), expected, "{body}");
        }

        let hash: String = sqlx::query_scalar("SELECT password_hash FROM users WHERE username = 'ada'")
            .fetch_one(&*app.db)
            .await
            .unwrap();
        assert!(bcrypt::verify("correct horse", &hash).unwrap());
    }

    #[tokio::test]
    async fn health_endpoints_report_ready() {
        let app = test_app(None).await;
        let live = app.router.clone().oneshot(get("/healthz")).await.unwrap();
        assert_eq!(live.status(), StatusCode::OK);
        let ready = app.router.oneshot(get("/readyz")).await.unwrap();
        assert_eq!(ready.status(), StatusCode::OK);
    }
}
