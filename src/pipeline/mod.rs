//! Pipeline stages for answering a question about remote images.
//!
//! Each submodule implements exactly one step; the orchestration that
//! strings them together lives in [`crate::agent`].
//!
//! ## Data Flow
//!
//! ```text
//! locator ──▶ fetch ──▶ normalize ──▶ infer
//! (parse)     (HTTP)    (resize)      (VLM)
//!                │          │
//!                └──────────┴──▶ artifacts (removal set)
//! ```
//!
//! 1. [`locator`]: split the locator list; name scratch files safely
//! 2. [`fetch`]: stream each locator to a local file
//! 3. [`normalize`]: fit oversized images inside the bounding box
//! 4. [`infer`]: one multimodal call with every image and the question
//! 5. [`artifacts`]: track and remove every file the run created

pub mod artifacts;
pub mod fetch;
pub mod infer;
pub mod locator;
pub mod normalize;
