//! File front end: store, fetch and remove files over HTTP, raising the
//! file hooks around each operation.
//!
//! ```text
//! PUT    /_files/<path>   store the body, then run after_file_put
//! GET    /_files/<path>   fetch
//! DELETE /_files/<path>   remove
//! ```

use std::io;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::put,
    Router,
};
use tracing::{info, warn};

use crate::error::Error;
use crate::events::{FileEventNotifier, StorageDriver};

/// Path prefix of the file routes.
pub const FILES_PREFIX: &str = "/_files";

/// Storage plus the hooks raised around it.
#[derive(Clone)]
pub struct FileFront {
    driver: Arc<dyn StorageDriver>,
    notifier: Arc<dyn FileEventNotifier>,
}

impl FileFront {
    pub fn new(driver: Arc<dyn StorageDriver>, notifier: Arc<dyn FileEventNotifier>) -> Self {
        Self { driver, notifier }
    }

    pub fn routes(self) -> Router {
        Router::new()
            .route(
                &format!("{FILES_PREFIX}/*path"),
                put(upload).get(download).delete(remove),
            )
            .with_state(self)
    }
}

fn error_response(target: &str, e: Error) -> Response {
    match &e {
        Error::Io(io) if io.kind() == io::ErrorKind::NotFound => StatusCode::NOT_FOUND.into_response(),
        Error::Io(io) if io.kind() == io::ErrorKind::InvalidInput => {
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        _ => {
            warn!("File operation on {target} failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn upload(State(front): State<FileFront>, Path(path): Path<String>, body: Bytes) -> Response {
    let target = format!("/{path}");
    front.notifier.before_put_file(&target).await;
    if let Err(e) = front.driver.put(&target, &body).await {
        return error_response(&target, e);
    }
    info!("Stored {target} ({} bytes)", body.len());
    front.notifier.after_file_put(&target).await;
    StatusCode::CREATED.into_response()
}

async fn download(State(front): State<FileFront>, Path(path): Path<String>) -> Response {
    let target = format!("/{path}");
    front.notifier.before_download_file(&target).await;
    match front.driver.get(&target).await {
        Ok(content) => {
            front.notifier.after_file_downloaded(&target).await;
            content.into_response()
        }
        Err(e) => error_response(&target, e),
    }
}

async fn remove(State(front): State<FileFront>, Path(path): Path<String>) -> Response {
    let target = format!("/{path}");
    front.notifier.before_delete_file(&target).await;
    match front.driver.delete(&target).await {
        Ok(()) => {
            front.notifier.after_file_deleted(&target).await;
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => error_response(&target, e),
    }
}
