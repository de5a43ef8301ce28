pub mod credentials;
pub mod error;
pub mod events;
pub mod format;
pub mod request;

pub use credentials::{resolve_credential, Credential, CredentialSource};
pub use error::GenerateError;
pub use format::{detect, DetectedFormat};
pub use request::{AspectRatio, GenerationRequest, ImageSize};
