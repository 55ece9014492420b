//! Client side of the collaborative slide editor: typed access to the hosted
//! backend, the nickname identity, the presentation store and the optimistic
//! slide editing session built on top of it.

pub mod backend;
pub mod config;
pub mod editor;
pub mod error;
pub mod identity;
pub mod realtime;
pub mod rest;
pub mod store;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{Backend, Subscription};
pub use config::BackendConfig;
pub use editor::SlideEditor;
pub use error::ClientError;
pub use identity::IdentityStore;
pub use rest::RestBackend;
pub use store::PresentationStore;
pub use upload::ImageUploader;
