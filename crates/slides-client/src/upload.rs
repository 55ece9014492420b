use reqwest::Client;
use reqwest::multipart::{Form, Part};
use tracing::{info, warn};

use slides_storage::ImagePolicy;
use slides_types::api::UploadResponse;

use crate::error::ClientError;

/// Path of the upload endpoint on the app server.
pub const UPLOAD_PATH: &str = "/api/upload-image";

/// Sends slide images to the app server's upload endpoint.
///
/// Files are checked against the same policy the server enforces before
/// any bytes leave the client.
pub struct ImageUploader {
    client: Client,
    endpoint: String,
    policy: ImagePolicy,
}

impl ImageUploader {
    /// `server_url` is the app server's origin, e.g. `http://localhost:3000`.
    pub fn new(server_url: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: format!("{}{}", server_url.trim_end_matches('/'), UPLOAD_PATH),
            policy: ImagePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ImagePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Upload one image and return its public URL.
    pub async fn upload_image(
        &self,
        presentation_id: &str,
        file_name: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<String, ClientError> {
        self.policy.validate(content_type, data.len())?;

        let size = data.len();
        let part = Part::bytes(data)
            .file_name(file_name.to_string())
            .mime_str(content_type)?;
        let form = Form::new()
            .part("image", part)
            .text("presentationId", presentation_id.to_string());

        let resp = self.client.post(&self.endpoint).multipart(form).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        let parsed: UploadResponse = match serde_json::from_str(&body) {
            Ok(r) => r,
            Err(_) => {
                warn!("Upload returned {} with a non-JSON body", status);
                return Err(ClientError::Upload(format!("server returned {}", status)));
            }
        };

        match parsed {
            UploadResponse {
                success: true,
                image_url: Some(url),
                ..
            } => {
                info!("Uploaded {} ({} bytes) to {}", file_name, size, url);
                Ok(url)
            }
            UploadResponse { error, .. } => Err(ClientError::Upload(
                error.unwrap_or_else(|| format!("server returned {}", status)),
            )),
        }
    }
}
