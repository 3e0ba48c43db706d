//! Same-origin echo endpoint for checking the transport by hand.
//!
//! `GET /echo` answers with the query parameters as a JSON object; `POST
//! /echo` answers with the JSON body it received. Any origin may call it.
//! This is a test fixture, not a collector.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::Query;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::error::Result;

/// The echo routes, with permissive CORS.
pub fn router() -> Router {
    Router::new()
        .route("/echo", get(echo_query).post(echo_body))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}

async fn echo_query(Query(params): Query<HashMap<String, String>>) -> Json<HashMap<String, String>> {
    Json(params)
}

async fn echo_body(Json(body): Json<Value>) -> Json<Value> {
    Json(body)
}

/// Bind `addr` and serve until the task is dropped. Returns the bound
/// address (useful with port 0) and the server task.
pub async fn spawn(addr: SocketAddr) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    info!(addr = %local, "echo server listening");
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router()).await {
            tracing::error!(error = %e, "echo server stopped");
        }
    });
    Ok((local, handle))
}
