use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Role, SlideContent};

// -- Row inserts --

#[derive(Debug, Clone, Serialize)]
pub struct NewPresentation {
    pub name: String,
    pub description: Option<String>,
    pub creator_nickname: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewMember {
    pub presentation_id: Uuid,
    pub nickname: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewSlide {
    pub presentation_id: Uuid,
    pub slide_number: i32,
    pub content_json: SlideContent,
}

// -- Row updates --

#[derive(Debug, Clone, Serialize)]
pub struct SlideContentUpdate {
    pub content_json: SlideContent,
    pub updated_at: DateTime<Utc>,
}

/// Arguments of the `update_user_role` remote procedure. The backend checks
/// that `requester_nickname` is the presentation's creator.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateRole {
    pub target_presentation_id: Uuid,
    pub target_nickname: String,
    pub new_role: Role,
    pub requester_nickname: String,
}

/// Error body returned by the REST gateway on non-2xx replies.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

// -- Image upload --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadResponse {
    pub fn stored(image_url: String, file_name: String) -> Self {
        Self {
            success: true,
            image_url: Some(image_url),
            file_name: Some(file_name),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            image_url: None,
            file_name: None,
            error: Some(error.into()),
        }
    }
}
