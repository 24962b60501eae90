//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that pings every configured backend

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::BTreeMap;

/// `GET /healthz`
///
/// Very small liveness probe; always 200 and never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Pings the relational and document stores with a trivial command and lists
/// buckets on the object store. Backends that are not configured are
/// reported but do not fail readiness. HTTP 200 when every configured check
/// passes, 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();

    let relational = match &state.relational {
        Some(store) => CheckStatus::from_result(store.ping().await),
        None => CheckStatus::not_configured(),
    };
    checks.insert("relational", relational);

    let documents = match &state.documents {
        Some(store) => CheckStatus::from_result(store.ping().await),
        None => CheckStatus::not_configured(),
    };
    checks.insert("documents", documents);

    let objects = match &state.objects {
        Some(store) => CheckStatus::from_result(store.list_buckets().await.map(|_| ())),
        None => CheckStatus::not_configured(),
    };
    checks.insert("objects", objects);

    let overall_ok = checks.values().all(|c| c.ok || !c.configured);
    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    configured: bool,
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn from_result<E: std::fmt::Display>(result: Result<(), E>) -> Self {
        Self {
            configured: true,
            ok: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
        }
    }

    fn not_configured() -> Self {
        Self {
            configured: false,
            ok: false,
            error: None,
        }
    }
}
