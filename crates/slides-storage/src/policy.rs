use std::fmt;

/// 10 MB ceiling for slide images
pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

pub const ALLOWED_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/svg+xml",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("File size too large. Maximum allowed size is {}MB", .max / (1024 * 1024))]
    TooLarge { size: usize, max: usize },
    #[error("Unsupported file type. Allowed types: {}", .allowed.join(", "))]
    UnsupportedType {
        content_type: String,
        allowed: Vec<String>,
    },
}

/// Which images are accepted. Checked before anything touches the network
/// or the store.
#[derive(Debug, Clone)]
pub struct ImagePolicy {
    max_size: usize,
    allowed_types: Vec<String>,
}

impl Default for ImagePolicy {
    fn default() -> Self {
        Self {
            max_size: MAX_FILE_SIZE,
            allowed_types: ALLOWED_TYPES.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl ImagePolicy {
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Size is checked first, then the declared MIME type. The ceiling is
    /// inclusive.
    pub fn validate(&self, content_type: &str, size: usize) -> Result<(), ValidationError> {
        if size > self.max_size {
            return Err(ValidationError::TooLarge {
                size,
                max: self.max_size,
            });
        }

        if !self.allowed_types.iter().any(|t| t == content_type) {
            return Err(ValidationError::UnsupportedType {
                content_type: content_type.to_string(),
                allowed: self.allowed_types.clone(),
            });
        }

        Ok(())
    }
}

impl fmt::Display for ImagePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} up to {} bytes",
            self.allowed_types.join("|"),
            self.max_size
        )
    }
}
