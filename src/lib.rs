//! # edgequake-vqa
//!
//! Answer a natural-language question about one or more remote images with a
//! Vision Language Model (VLM).
//!
//! ## Pipeline Overview
//!
//! ```text
//! "http://h/1.png,http://h/2.png" + "What color is the car?"
//!  │
//!  ├─ 1. Parse      split the locator list, in order
//!  ├─ 2. Fetch      stream each image to a uniquely named scratch file
//!  ├─ 3. Normalize  downscale anything larger than 1024 px (aspect kept)
//!  ├─ 4. Ask        one VLM call with every image and the question
//!  ├─ 5. Report     *completed* event carrying the answer
//!  └─ 6. Cleanup    remove every scratch file, whatever happened
//! ```
//!
//! A run never returns an error to its caller. Success is signalled by the
//! *completed* event (and [`RunReport::answer`]); on failure the run logs
//! the error, optionally emits a *failed* event, and still cleans up.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_vqa::{AgentConfig, ImageQaAgent, InvocationContext, TracingEventSink};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AgentConfig::builder()
//!         .provider_name("ollama")
//!         .model("gemma3:27b")
//!         .build()?;
//!     let agent = ImageQaAgent::from_config(config)?;
//!
//!     let ctx = InvocationContext::new(
//!         "query-42",
//!         "https://example.com/1.png,https://example.com/2.png",
//!         "What color is the car?",
//!     );
//!     let report = agent.run(&ctx, &TracingEventSink).await;
//!     println!("{:?}", report.answer);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `vqa` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use agent::{ImageQaAgent, RunReport};
pub use config::{
    AgentConfig, AgentConfigBuilder, DEFAULT_MAX_DIMENSION, DEFAULT_MODEL, MIN_MAX_DIMENSION,
};
pub use context::{InvocationContext, QueryParams};
pub use error::{CleanupWarning, ErrorKind, VqaError};
pub use events::{
    AgentEvent, ChannelEventSink, EventKind, EventSink, NoopEventSink, TracingEventSink,
};
pub use pipeline::fetch::{HttpFetcher, ResourceFetcher};
pub use pipeline::infer::{EncodedImage, InferenceBackend, LlmBackend};
