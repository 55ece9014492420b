use std::path::Path;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::StatusCode,
    routing::get,
};
use bytes::Bytes;
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

use slides_storage::{ImagePolicy, ObjectStore, object_path, sanitize_presentation_id, unique_filename};
use slides_types::api::UploadResponse;

/// Room for multipart framing on top of the largest accepted image.
const FORM_OVERHEAD: usize = 1024 * 1024;

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ObjectStore>,
    pub policy: ImagePolicy,
}

type Reply = (StatusCode, Json<UploadResponse>);

fn reject(status: StatusCode, message: impl Into<String>) -> Reply {
    (status, Json(UploadResponse::failed(message)))
}

/// Routes of the app server. `images_dir` is served read-only under
/// `/images` when images are kept on local disk.
pub fn router(state: AppState, images_dir: Option<&Path>) -> Router {
    let body_limit = state.policy.max_size() + FORM_OVERHEAD;

    let mut app = Router::new()
        .route(
            "/api/upload-image",
            get(method_not_allowed)
                .post(upload_image)
                .put(method_not_allowed)
                .delete(method_not_allowed),
        )
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state);

    if let Some(dir) = images_dir {
        app = app.nest_service("/images", ServeDir::new(dir));
    }
    app
}

// ── Upload form ─────────────────────────────────────────────────────────

struct ImageFile {
    name: String,
    content_type: String,
    data: Bytes,
}

#[derive(Default)]
struct UploadForm {
    image: Option<ImageFile>,
    presentation_id: Option<String>,
}

fn form_error(err: MultipartError) -> Reply {
    warn!("Unreadable upload form: {}", err.body_text());
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return reject(StatusCode::PAYLOAD_TOO_LARGE, err.body_text());
    }
    reject(StatusCode::BAD_REQUEST, "Invalid multipart body")
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, Reply> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("image") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(form_error)?;
                form.image = Some(ImageFile {
                    name: file_name,
                    content_type,
                    data,
                });
            }
            Some("presentationId") => {
                form.presentation_id = Some(field.text().await.map_err(form_error)?);
            }
            _ => {}
        }
    }
    Ok(form)
}

// ── Handlers ────────────────────────────────────────────────────────────

/// POST /api/upload-image: store one slide image and return its public URL.
///
/// Every check runs before the store is touched.
pub async fn upload_image(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Reply {
    let multipart = match multipart {
        Ok(m) => m,
        Err(e) => {
            warn!("Upload without a multipart body: {}", e);
            return reject(StatusCode::BAD_REQUEST, "Invalid multipart body");
        }
    };
    let form = match read_form(multipart).await {
        Ok(form) => form,
        Err(reply) => return reply,
    };

    let Some(image) = form.image else {
        return reject(StatusCode::BAD_REQUEST, "No image file provided");
    };
    let Some(raw_id) = form.presentation_id.filter(|id| !id.is_empty()) else {
        return reject(StatusCode::BAD_REQUEST, "Presentation ID is required");
    };

    if let Err(e) = state.policy.validate(&image.content_type, image.data.len()) {
        warn!("Rejected {} ({}, {} bytes): {}", image.name, image.content_type, image.data.len(), e);
        return reject(StatusCode::BAD_REQUEST, e.to_string());
    }

    let presentation_id = sanitize_presentation_id(&raw_id);
    if presentation_id.is_empty() {
        return reject(StatusCode::BAD_REQUEST, "Invalid presentation ID");
    }

    let file_name = unique_filename(&image.name);
    let path = object_path(&presentation_id, &file_name);
    let size = image.data.len();

    if let Err(e) = state.store.upload(&path, image.data, &image.content_type).await {
        error!("Storage upload of {} failed: {}", path, e);
        return reject(StatusCode::INTERNAL_SERVER_ERROR, "Failed to upload image to storage");
    }

    let image_url = state.store.public_url(&path);
    info!("Image {} stored for presentation {} ({} bytes)", file_name, presentation_id, size);

    (StatusCode::OK, Json(UploadResponse::stored(image_url, file_name)))
}

pub async fn method_not_allowed() -> Reply {
    reject(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

pub async fn health() -> &'static str {
    "ok"
}
