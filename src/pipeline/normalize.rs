//! Image normalisation: fit images inside a square bounding box.
//!
//! ## Policy
//!
//! Only the header is read first. If both edges are within `max_dimension`
//! the source path is returned untouched and no file is created. Otherwise
//! the image is decoded and downscaled so the longer edge equals
//! `max_dimension` and the shorter edge keeps the aspect ratio (rounded to
//! the nearest pixel, never below 1). Images are never enlarged.
//!
//! The derivative is written next to the source as `<stem>_resized.<ext>`
//! in the format sniffed from the source bytes, not the one implied by the
//! file name. Callers tell "original" from "derivative" by comparing the
//! returned path with the source path.
//!
//! Decoding and resampling run in `spawn_blocking`. If the caller stops
//! waiting (the run future is dropped) the blocking task either skips the
//! write or has its output removed; it never leaves a derivative behind.

use crate::error::VqaError;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Suffix inserted before the extension of a resized derivative.
pub const RESIZED_SUFFIX: &str = "_resized";

/// Target size for a `width × height` image inside a `max × max` box.
///
/// Returns `None` when the image already fits.
pub fn fit_inside(width: u32, height: u32, max: u32) -> Option<(u32, u32)> {
    if width <= max && height <= max {
        return None;
    }
    let (w, h, m) = (width as u64, height as u64, max as u64);
    let (new_w, new_h) = if w >= h {
        (m, ((h * m + w / 2) / w).max(1))
    } else {
        (((w * m + h / 2) / h).max(1), m)
    };
    Some((new_w as u32, new_h as u32))
}

/// Deterministic derivative path: `dir/name.png` → `dir/name_resized.png`.
pub fn derivative_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match source.extension() {
        Some(ext) => format!("{}{}.{}", stem, RESIZED_SUFFIX, ext.to_string_lossy()),
        None => format!("{}{}", stem, RESIZED_SUFFIX),
    };
    source.with_file_name(name)
}

/// Normalise `source` for inference and return the path to send.
///
/// Returns `source` itself when no resize is needed, otherwise the path of
/// a newly written derivative which the caller now owns.
pub async fn normalize(source: &Path, max_dimension: u32) -> Result<PathBuf, VqaError> {
    let path = source.to_path_buf();
    let guard = AbandonGuard::new(derivative_path(source));
    let abandoned = Arc::clone(&guard.abandoned);
    let result = tokio::task::spawn_blocking(move || {
        normalize_blocking(&path, max_dimension, &abandoned)
    })
    .await
    .map_err(|e| VqaError::Internal(format!("Normalize task panicked: {}", e)))?;
    guard.disarm();
    result
}

/// Removes the derivative if [`normalize`] is dropped before the blocking
/// task is joined.
///
/// The flag and the write share one lock: either the write finishes first
/// and the guard removes the file, or the guard wins and the write is
/// skipped.
struct AbandonGuard {
    out: PathBuf,
    abandoned: Arc<Mutex<bool>>,
    armed: bool,
}

impl AbandonGuard {
    fn new(out: PathBuf) -> Self {
        Self {
            out,
            abandoned: Arc::new(Mutex::new(false)),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut abandoned = self.abandoned.lock().unwrap_or_else(PoisonError::into_inner);
        *abandoned = true;
        remove_derivative(&self.out);
    }
}

/// Blocking implementation of [`normalize`].
fn normalize_blocking(
    source: &Path,
    max_dimension: u32,
    abandoned: &Mutex<bool>,
) -> Result<PathBuf, VqaError> {
    let (width, height) = open_reader(source)?
        .into_dimensions()
        .map_err(|e| decode_error(source, e))?;

    let Some((new_w, new_h)) = fit_inside(width, height, max_dimension) else {
        debug!(
            "{} is {}x{} px, within {} px; sending as-is",
            source.display(),
            width,
            height,
            max_dimension
        );
        return Ok(source.to_path_buf());
    };

    let reader = open_reader(source)?;
    let format = reader.format();
    let image = reader.decode().map_err(|e| decode_error(source, e))?;
    let resized = image.resize_exact(new_w, new_h, FilterType::Lanczos3);

    let out = derivative_path(source);
    let abandoned = abandoned.lock().unwrap_or_else(PoisonError::into_inner);
    if *abandoned {
        return Err(VqaError::Internal(format!(
            "Resize of {} abandoned by caller",
            source.display()
        )));
    }
    if let Err(e) = write_image(&resized, format.unwrap_or(ImageFormat::Png), &out) {
        remove_derivative(&out);
        return Err(e);
    }
    drop(abandoned);

    info!(
        "Resized {} from {}x{} to {}x{} px",
        source.display(),
        width,
        height,
        new_w,
        new_h
    );
    Ok(out)
}

/// Remove a derivative that must not survive. A missing file is fine.
fn remove_derivative(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed derivative {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove derivative {}: {}", path.display(), e),
    }
}

/// Open `path` with the format sniffed from its content.
fn open_reader(path: &Path) -> Result<ImageReader<std::io::BufReader<File>>, VqaError> {
    ImageReader::open(path)
        .map_err(|e| decode_error(path, e))?
        .with_guessed_format()
        .map_err(|e| decode_error(path, e))
}

fn write_image(image: &DynamicImage, format: ImageFormat, out: &Path) -> Result<(), VqaError> {
    let io_err = |e: std::io::Error| {
        VqaError::Internal(format!("Failed to write {}: {}", out.display(), e))
    };

    let mut writer = BufWriter::new(File::create(out).map_err(io_err)?);
    let encoded = match format {
        // JPEG has no alpha channel.
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()).write_to(&mut writer, format),
        ImageFormat::Gif => DynamicImage::ImageRgba8(image.to_rgba8()).write_to(&mut writer, format),
        _ => image.write_to(&mut writer, format),
    };
    encoded.map_err(|e| VqaError::Internal(format!("Failed to encode {}: {}", out.display(), e)))?;

    writer.flush().map_err(io_err)?;
    writer
        .into_inner()
        .map_err(|e| io_err(e.into_error()))?
        .sync_all()
        .map_err(io_err)?;
    Ok(())
}

fn decode_error(path: &Path, e: impl std::fmt::Display) -> VqaError {
    VqaError::Decode {
        path: path.to_path_buf(),
        detail: e.to_string(),
    }
}
