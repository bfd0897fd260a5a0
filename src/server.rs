// Copyright 2025 Fernando Borretti
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;
use std::sync::Mutex;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::HeaderName;
use axum::http::StatusCode;
use axum::http::header::ACCESS_CONTROL_ALLOW_HEADERS;
use axum::http::header::ACCESS_CONTROL_ALLOW_METHODS;
use axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN;
use axum::routing::post;
use serde::Serialize;
use tokio::net::TcpListener;

use crate::collection::SqliteCollection;
use crate::config::Config;
use crate::error::Fallible;
use crate::remote::HttpCatalog;
use crate::sync::Synchronizer;
use crate::types::report::SyncReport;

type CorsHeaders = [(HeaderName, &'static str); 3];

const CORS_HEADERS: CorsHeaders = [
    (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    (ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"),
    (ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
];

#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    /// Held for the whole of a cycle, so cycles never overlap.
    pub collection: Arc<Mutex<SqliteCollection>>,
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum SyncResponse {
    Ok { report: SyncReport },
    Error { message: String },
}

/// Serve `POST /sync` on `bind` until the process is stopped.
pub async fn start_server(config: Config, bind: &str) -> Fallible<()> {
    let collection = SqliteCollection::open(&config.collection_path, &config)?;
    let app = router(config, Arc::new(Mutex::new(collection)));
    log::info!("Starting sync trigger server on {bind}");
    let listener = TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(config: Config, collection: Arc<Mutex<SqliteCollection>>) -> Router {
    let state = ServerState {
        config: Arc::new(config),
        collection,
    };
    let app = Router::new();
    let app = app.route(
        "/sync",
        post(sync).options(preflight).fallback(not_found_handler),
    );
    let app = app.fallback(not_found_handler);
    app.with_state(state)
}

async fn sync(State(state): State<ServerState>) -> (StatusCode, CorsHeaders, Json<SyncResponse>) {
    log::info!("Sync triggered.");
    let result = tokio::task::spawn_blocking(move || run_cycle(&state)).await;
    let (status, response) = match result {
        Ok(Ok(report)) => (StatusCode::OK, SyncResponse::Ok { report }),
        Ok(Err(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            SyncResponse::Error {
                message: e.message().to_string(),
            },
        ),
        Err(e) => {
            log::error!("Sync task failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                SyncResponse::Error {
                    message: "sync task failed".to_string(),
                },
            )
        }
    };
    (status, CORS_HEADERS, Json(response))
}

/// Run one cycle. Blocks, so must run off the async workers.
fn run_cycle(state: &ServerState) -> Fallible<SyncReport> {
    let remote = HttpCatalog::new(&state.config)?;
    let mut collection = state.collection.lock().unwrap();
    let report = Synchronizer::new(&remote, &mut *collection).run_cycle()?;
    Ok(report)
}

async fn preflight() -> (StatusCode, CorsHeaders) {
    (StatusCode::NO_CONTENT, CORS_HEADERS)
}

async fn not_found_handler() -> (StatusCode, CorsHeaders, Json<SyncResponse>) {
    (
        StatusCode::NOT_FOUND,
        CORS_HEADERS,
        Json(SyncResponse::Error {
            message: "Not found".to_string(),
        }),
    )
}
