mod config;
mod constants;
mod domain;
mod logging;
mod models;
mod routes;
mod services;

use anyhow::Context;
use axum::{Router, routing::get};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

use config::{Config, StorageKind};
use services::auth::AuthService;
use services::db::{Classifier, Transactor};
use services::expenses::{ExpenseService, ExpenseStore, MemExpenseStore, SqlExpenseStore};
use services::pg::PgProvider;

/// How long a transaction attempt waits for a pooled connection before the
/// attempt counts as "database unavailable"
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct AppState {
    pub auth: AuthService,
    pub expenses: ExpenseService,
}

async fn health() -> &'static str {
    "ok"
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/data", routes::build_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn expense_store(config: &Config) -> anyhow::Result<ExpenseStore> {
    if config.storage == StorageKind::Memory {
        info!("using in-memory expense storage");
        return Ok(ExpenseStore::Memory(MemExpenseStore::default()));
    }

    // Lazy, so an unreachable database is retried by the transactor
    // instead of failing here
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_lazy(&config.database_url)
        .context("Invalid DATABASE_URL")?;

    let transactor = Transactor::new(
        PgProvider::new(pool),
        Classifier::new(config.deadlock_codes.clone()),
    );
    let store = SqlExpenseStore::new(transactor);
    store
        .create_tables()
        .await
        .context("Failed to create expense tables")?;

    Ok(ExpenseStore::Sql(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = Config::from_env();
    let store = expense_store(&config).await?;

    let state = Arc::new(AppState {
        auth: AuthService::new(&config.users),
        expenses: ExpenseService::new(store),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(%addr, "listening");
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn test_app() -> Router {
        let state = Arc::new(AppState {
            auth: AuthService::new(&[("user@mac.com".to_string(), "Welcome123".to_string())]),
            expenses: ExpenseService::new(ExpenseStore::Memory(MemExpenseStore::default())),
        });
        app(state)
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            // the login rate limiter keys on client IP
            .header("x-forwarded-for", "10.0.0.1");
        if let Some(token) = token {
            builder = builder.header(header::COOKIE, format!("AUTH={}", token));
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    async fn login(app: &Router) -> String {
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/data/login",
                None,
                Some(json!({ "userId": "user@mac.com", "password": "Welcome123" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        let token = body["id"].as_str().unwrap().to_string();
        assert!(cookie.starts_with(&format!("AUTH={};", token)));
        assert_eq!(body["user"], "user@mac.com");
        token
    }

    fn lunch() -> Value {
        json!({ "amount": 12.5, "date": "2017-03-01T12:00:00Z", "description": "lunch" })
    }

    #[tokio::test]
    async fn health_needs_no_session() {
        let (status, _) = send(&test_app(), request("GET", "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn expense_lifecycle_over_http() {
        let app = test_app();
        let token = login(&app).await;

        let (status, created) =
            send(&app, request("POST", "/data/expenses", Some(token.as_str()), Some(lunch()))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["userId"], "user@mac.com");
        let id = created["id"].as_i64().unwrap();
        let uri = format!("/data/expenses/{}", id);

        let (status, listed) = send(&app, request("GET", "/data/expenses", Some(token.as_str()), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed, json!([created.clone()]));

        let (status, fetched) = send(&app, request("GET", &uri, Some(token.as_str()), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, created);

        let (status, updated) = send(
            &app,
            request(
                "PUT",
                &uri,
                Some(token.as_str()),
                Some(json!({ "amount": 14.0, "date": "2017-03-01T12:00:00Z", "description": "lunch + tip" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["amount"], 14.0);
        assert_eq!(updated["id"], id);

        let (status, _) = send(&app, request("DELETE", &uri, Some(token.as_str()), None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, request("GET", &uri, Some(token.as_str()), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_expense_is_a_bad_request() {
        let app = test_app();
        let token = login(&app).await;

        let (status, _) = send(
            &app,
            request("POST", "/data/expenses", Some(token.as_str()), Some(json!({ "amount": 3.0 }))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn expenses_require_a_live_session() {
        let app = test_app();

        let (status, _) = send(&app, request("GET", "/data/expenses", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(&app, request("GET", "/data/expenses", Some("bogus"), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // a bearer header works as well as the cookie
        let token = login(&app).await;
        let req = Request::builder()
            .uri("/data/expenses")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let (status, listed) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed, json!([]));
    }

    #[tokio::test]
    async fn wrong_password_is_forbidden() {
        let app = test_app();
        let (status, _) = send(
            &app,
            request(
                "POST",
                "/data/login",
                None,
                Some(json!({ "userId": "user@mac.com", "password": "nope" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn logout_ends_the_session() {
        let app = test_app();
        let token = login(&app).await;

        let response = app
            .clone()
            .oneshot(request("POST", "/data/logout", Some(token.as_str()), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let cleared = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cleared.contains("Max-Age=0"));

        let (status, _) = send(&app, request("GET", "/data/me", Some(token.as_str()), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn register_conflicts_on_existing_user() {
        let app = test_app();
        let creds = json!({ "userId": "new@x.com", "password": "pw" });

        let (status, body) = send(&app, request("POST", "/data/register", None, Some(creds.clone()))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"], "new@x.com");

        let (status, _) = send(&app, request("POST", "/data/register", None, Some(creds))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn deleting_the_account_revokes_its_token() {
        let app = test_app();
        let token = login(&app).await;

        let (status, me) = send(&app, request("GET", "/data/me", Some(token.as_str()), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["user"], "user@mac.com");

        let (status, _) = send(&app, request("DELETE", "/data/me", Some(token.as_str()), None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, request("GET", "/data/me", Some(token.as_str()), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
