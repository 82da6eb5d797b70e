use crate::uploads::{UploadError, UploadStore};
use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

// Room for multipart overhead on top of a 10 MiB image.
const UPLOAD_BODY_LIMIT: usize = 11 * 1024 * 1024;

pub fn router(uploads: UploadStore) -> Router {
    let dir = uploads.dir().to_path_buf();
    Router::new()
        .route("/api/uploads", post(upload_file).delete(delete_upload))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
        .nest_service("/uploads", ServeDir::new(dir))
        .with_state(uploads)
}

pub async fn serve(uploads: UploadStore, port: u16) -> Result<()> {
    let app = router(uploads).layer(TraceLayer::new_for_http());
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Upload server listening on http://{}", addr);
    println!("  Upload API: http://{}/api/uploads", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

fn failure(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn upload_file(State(uploads): State<UploadStore>, mut multipart: Multipart) -> Response {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to parse multipart body: {}", e);
                return failure(StatusCode::BAD_REQUEST, "Malformed upload");
            }
        };
        if field.name() != Some("file") {
            continue;
        }

        let name = field.file_name().unwrap_or("upload").to_string();
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to read uploaded file: {}", e);
                return failure(StatusCode::BAD_REQUEST, "Failed to read file");
            }
        };

        let saved = tokio::task::spawn_blocking(move || uploads.save(&name, &bytes)).await;
        return match saved {
            Ok(Ok(path)) => Json(json!({ "success": true, "filePath": path })).into_response(),
            Ok(Err(UploadError::InvalidName(name))) => {
                failure(StatusCode::BAD_REQUEST, &format!("Invalid file name: {}", name))
            }
            Ok(Err(e)) => {
                error!("Error uploading file: {}", e);
                failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to upload file")
            }
            Err(e) => {
                error!("Upload task failed: {}", e);
                failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to upload file")
            }
        };
    }

    failure(StatusCode::BAD_REQUEST, &UploadError::NoFile.to_string())
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub filepath: Option<String>,
    pub delete_all: Option<String>,
}

async fn delete_upload(
    State(uploads): State<UploadStore>,
    Query(q): Query<DeleteQuery>,
) -> Response {
    if q.delete_all.as_deref() == Some("true") {
        let removed = tokio::task::spawn_blocking(move || uploads.delete_all()).await;
        return match removed {
            Ok(Ok(_)) => Json(json!({ "success": true })).into_response(),
            Ok(Err(e)) => {
                error!("Error deleting uploads: {}", e);
                failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete file")
            }
            Err(e) => {
                error!("Delete task failed: {}", e);
                failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete file")
            }
        };
    }

    let Some(filepath) = q.filepath else {
        return failure(StatusCode::BAD_REQUEST, "No filepath provided");
    };

    let deleted = tokio::task::spawn_blocking(move || uploads.delete(&filepath)).await;
    match deleted {
        Ok(Ok(())) => Json(json!({ "success": true })).into_response(),
        Ok(Err(UploadError::InvalidName(name))) => {
            failure(StatusCode::BAD_REQUEST, &format!("Invalid file path: {}", name))
        }
        Ok(Err(e)) => {
            error!("Error deleting file: {}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete file")
        }
        Err(e) => {
            error!("Delete task failed: {}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete file")
        }
    }
}
