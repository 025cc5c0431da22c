//! Batch inference: one question, every normalised image, one model call.
//!
//! [`InferenceBackend`] is the seam between the pipeline and the model. The
//! production implementation, [`LlmBackend`], sends a single user message
//! carrying the prompt and all images through an edgequake-llm provider.
//! There is no streaming and no retry: a failed call fails the run.
//!
//! Images are base64-wrapped with the MIME type sniffed from their bytes,
//! so a PNG downloaded under a `.jpg` name is still labelled `image/png`.

use crate::config::AgentConfig;
use crate::error::VqaError;
use crate::prompts::question_prompt;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use futures::future::try_join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// An image ready for a multimodal request body.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    /// The artifact the bytes were read from.
    pub source: PathBuf,
    pub mime_type: &'static str,
    /// Base64 (standard alphabet, padded) image bytes.
    pub data: String,
}

/// Infer-by-prompt-and-images capability.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Send `prompt` and `images` (in order) and return the raw answer.
    async fn infer(&self, prompt: &str, images: Vec<EncodedImage>) -> Result<String, VqaError>;
}

/// [`InferenceBackend`] over an edgequake-llm provider.
pub struct LlmBackend {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
}

impl LlmBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &AgentConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    fn build_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl InferenceBackend for LlmBackend {
    async fn infer(&self, prompt: &str, images: Vec<EncodedImage>) -> Result<String, VqaError> {
        let start = Instant::now();
        let image_data: Vec<ImageData> = images
            .iter()
            .map(|img| ImageData::new(img.data.clone(), img.mime_type).with_detail("high"))
            .collect();

        let messages = vec![ChatMessage::user_with_images(prompt, image_data)];
        let options = self.build_options();

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| VqaError::Inference {
                message: e.to_string(),
            })?;

        debug!(
            "{} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

/// Read an artifact and wrap it for the request body.
pub async fn encode_image(path: &Path) -> Result<EncodedImage, VqaError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| VqaError::Decode {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let format = image::guess_format(&bytes).map_err(|e| VqaError::Decode {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    let data = STANDARD.encode(&bytes);
    debug!("Encoded {} → {} bytes base64", path.display(), data.len());

    Ok(EncodedImage {
        source: path.to_path_buf(),
        mime_type: format.to_mime_type(),
        data,
    })
}

/// Ask `question` about `images` in a single call.
///
/// `template` is the instruction text around the question (see
/// [`crate::prompts`]). The answer is returned unmodified; an answer that is
/// empty or whitespace-only is an [`VqaError::Inference`].
pub async fn ask(
    backend: &dyn InferenceBackend,
    images: &[PathBuf],
    question: &str,
    template: &str,
) -> Result<String, VqaError> {
    let encoded = try_join_all(images.iter().map(|p| encode_image(p))).await?;
    let prompt = question_prompt(template, question);

    info!("Asking the model about {} images", encoded.len());
    let answer = backend.infer(&prompt, encoded).await?;

    if answer.trim().is_empty() {
        return Err(VqaError::Inference {
            message: "model returned no usable text".to_string(),
        });
    }
    Ok(answer)
}
