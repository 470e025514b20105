//! Vision model backend abstraction.
//!
//! The extraction pipeline only needs "send this prompt plus these images,
//! give me the text answer". [`VisionBackend`] is that seam; the Mistral chat
//! completions client is the production implementation.

pub mod mistral;

use crate::error::ExtractionError;

/// Async trait implemented by each multimodal backend.
#[async_trait::async_trait]
pub trait VisionBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Send one prompt with JPEG images attached and return the message text.
    async fn complete(&self, prompt: &str, images: &[&[u8]]) -> Result<String, ExtractionError>;
}
