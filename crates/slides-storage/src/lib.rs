//! Image storage for slide decks: what may be uploaded, where it lands, and
//! the object stores that hold it.

pub mod path;
pub mod policy;
pub mod store;

pub use path::{object_path, sanitize_presentation_id, unique_filename};
pub use policy::{ALLOWED_TYPES, ImagePolicy, MAX_FILE_SIZE, ValidationError};
pub use store::{LocalStore, ObjectStore, StorageError, SupabaseStorage};

/// Bucket every slide image is written to.
pub const IMAGE_BUCKET: &str = "images";
