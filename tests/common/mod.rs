//! Substitutable fakes for the fetch and inference seams.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_vqa::{EncodedImage, InferenceBackend, ResourceFetcher, VqaError};
use image::{ImageFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// What the fake fetcher produces for a locator.
#[derive(Debug, Clone, Copy)]
pub enum Served {
    /// A valid PNG of the given size.
    Png(u32, u32),
    /// Bytes that are not an image.
    Garbage,
    /// A retrieval failure (as if the server answered 404).
    NotFound,
}

/// Writes generated images for known locators; fails for everything else.
#[derive(Default)]
pub struct FakeFetcher {
    routes: HashMap<String, (Served, Duration)>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, locator: &str, served: Served) -> Self {
        self.routes
            .insert(locator.to_string(), (served, Duration::ZERO));
        self
    }

    pub fn route_delayed(mut self, locator: &str, served: Served, delay_ms: u64) -> Self {
        self.routes.insert(
            locator.to_string(),
            (served, Duration::from_millis(delay_ms)),
        );
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResourceFetcher for FakeFetcher {
    async fn fetch(&self, locator: &str, destination: &Path) -> Result<PathBuf, VqaError> {
        self.calls.lock().unwrap().push(locator.to_string());
        let (served, delay) = self
            .routes
            .get(locator)
            .copied()
            .unwrap_or((Served::NotFound, Duration::ZERO));

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match served {
            Served::Png(w, h) => {
                RgbImage::from_pixel(w, h, Rgb([200, 30, 30]))
                    .save_with_format(destination, ImageFormat::Png)
                    .map_err(|e| VqaError::Internal(e.to_string()))?;
            }
            Served::Garbage => {
                std::fs::write(destination, b"<html>not an image</html>")
                    .map_err(|e| VqaError::Internal(e.to_string()))?;
            }
            Served::NotFound => {
                return Err(VqaError::Retrieval {
                    locator: locator.to_string(),
                    reason: "HTTP 404 Not Found".to_string(),
                });
            }
        }
        Ok(destination.to_path_buf())
    }
}

/// One recorded model call.
#[derive(Debug, Clone)]
pub struct Call {
    pub prompt: String,
    /// Pixel size of each image, in the order received.
    pub sizes: Vec<(u32, u32)>,
    pub mime_types: Vec<&'static str>,
}

/// Records every call and answers with a fixed result.
pub struct FakeBackend {
    answer: Result<String, String>,
    pub calls: Mutex<Vec<Call>>,
}

impl FakeBackend {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Ok(answer.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            answer: Err(message.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceBackend for FakeBackend {
    async fn infer(&self, prompt: &str, images: Vec<EncodedImage>) -> Result<String, VqaError> {
        let sizes = images
            .iter()
            .map(|img| {
                let bytes = STANDARD.decode(&img.data).expect("valid base64");
                let decoded = image::load_from_memory(&bytes).expect("decodable image");
                (decoded.width(), decoded.height())
            })
            .collect();
        self.calls.lock().unwrap().push(Call {
            prompt: prompt.to_string(),
            sizes,
            mime_types: images.iter().map(|i| i.mime_type).collect(),
        });

        self.answer
            .clone()
            .map_err(|message| VqaError::Inference { message })
    }
}

/// Number of entries left in `dir`.
pub fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}
