//! HTTP surface of the vault. Every handler acts as the configured demo user.

mod access;
mod medical;
mod objects;
mod profile;
mod proofs;
mod vault;

use crate::state::AppState;
use axum::{
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/login", post(profile::login))
        .route("/api/dashboard", get(profile::dashboard))
        .route("/api/profile", patch(profile::update_profile))
        .route("/api/user/privacy-level", patch(profile::update_privacy_level))
        .route("/api/settings", patch(profile::update_settings))
        .route("/api/audit-logs", get(profile::list_audit_logs))
        .route("/api/vault-items", get(vault::list_items).post(vault::create_item))
        .route("/api/access-requests", get(access::list_requests).post(access::create_request))
        .route("/api/access-requests/:id/approve", post(access::approve))
        .route("/api/access-requests/:id/deny", post(access::deny))
        .route("/api/access-requests/:id/revoke", post(access::revoke))
        .route("/api/grant-access", post(access::grant))
        .route("/api/generate-proof", post(proofs::generate))
        .route("/api/verify-proof/:id", get(proofs::verify))
        .route("/api/medical-form-tokens", post(medical::create_token))
        .route("/api/medical-form-tokens/:user_id", get(medical::list_tokens))
        .route("/api/medical-form/:token", get(medical::get_form))
        .route("/api/medical-form/:token/complete", post(medical::complete_form))
        .route("/api/objects/upload", post(objects::request_upload))
        .route("/objects/*path", get(objects::download).put(objects::upload))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
