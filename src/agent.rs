//! The agent: drives one image-question run from locators to answer.
//!
//! ## Run lifecycle
//!
//! ```text
//! START ─▶ FETCH(i) ─▶ NORMALIZE(i) ─┐
//!   ▲            (for each locator)  │
//!   └────────────────────────────────┘
//!                 ─▶ INFER ─▶ REPORT ─▶ CLEANUP ─▶ DONE
//!       any error ─────────▶ REPORT ─▶ CLEANUP ─▶ DONE
//! ```
//!
//! Every file the fetcher or normaliser creates is registered in the run's
//! [`ArtifactSet`] the moment it exists, so cleanup sees it no matter which
//! later step fails. Errors never escape [`ImageQaAgent::run`]: they are
//! logged, optionally reported as a *failed* event, and returned inside the
//! [`RunReport`].

use crate::config::{AgentConfig, DEFAULT_MODEL};
use crate::context::InvocationContext;
use crate::error::{CleanupWarning, VqaError};
use crate::events::{AgentEvent, EventSink};
use crate::pipeline::artifacts::{ArtifactSet, ArtifactStage};
use crate::pipeline::fetch::{HttpFetcher, ResourceFetcher};
use crate::pipeline::infer::{self, InferenceBackend, LlmBackend};
use crate::pipeline::locator::ArtifactNamer;
use crate::pipeline::normalize::{derivative_path, normalize};
use crate::prompts::DEFAULT_QUESTION_TEMPLATE;
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one run, returned instead of an `Err`.
#[derive(Debug)]
pub struct RunReport {
    pub query_id: String,
    /// The model's answer, present exactly when a *completed* event was emitted.
    pub answer: Option<String>,
    /// Why the run aborted, if it did.
    pub error: Option<VqaError>,
    /// Normalised images produced (equals the locator count on success).
    pub images: usize,
    /// Temporary files created during the run (all removed by now).
    pub artifacts_created: usize,
    pub cleanup_warnings: Vec<CleanupWarning>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.answer.is_some()
    }
}

/// Ephemeral per-run state, owned by [`ImageQaAgent::run`].
struct RunContext {
    locators: Vec<String>,
    namer: ArtifactNamer,
    artifacts: ArtifactSet,
    normalized: Vec<PathBuf>,
}

/// Answers a question about one or more remote images.
///
/// Construct once (it holds the shared HTTP client and model provider) and
/// call [`run`](Self::run) per request; runs share no mutable state and can
/// execute concurrently.
pub struct ImageQaAgent {
    config: AgentConfig,
    fetcher: Arc<dyn ResourceFetcher>,
    backend: Arc<dyn InferenceBackend>,
}

impl ImageQaAgent {
    /// Assemble an agent from explicit collaborators.
    pub fn new(
        config: AgentConfig,
        fetcher: Arc<dyn ResourceFetcher>,
        backend: Arc<dyn InferenceBackend>,
    ) -> Self {
        Self {
            config,
            fetcher,
            backend,
        }
    }

    /// Build the production agent: [`HttpFetcher`] plus an edgequake-llm
    /// provider resolved from `config` and the environment.
    pub fn from_config(config: AgentConfig) -> Result<Self, VqaError> {
        let fetcher = HttpFetcher::new(config.download_timeout_secs)?;
        let provider = resolve_provider(&config)?;
        let backend = LlmBackend::new(provider, &config);
        Ok(Self::new(config, Arc::new(fetcher), Arc::new(backend)))
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Execute one run for `context`, reporting through `sink`.
    pub async fn run(&self, context: &InvocationContext, sink: &dyn EventSink) -> RunReport {
        let start = Instant::now();
        sink.emit_event_created(AgentEvent::started(context));

        let mut run = RunContext {
            locators: context.locators(self.config.locator_separator),
            namer: ArtifactNamer::new(&self.config.scratch_dir),
            artifacts: ArtifactSet::new(),
            normalized: Vec::new(),
        };
        info!(
            "Run {}: {} image locators",
            context.query_id,
            run.locators.len()
        );

        let outcome = self.execute(&mut run, context.question()).await;

        let (answer, error) = match outcome {
            Ok(answer) => {
                sink.emit_query_completed(AgentEvent::completed(context, answer.as_str()));
                (Some(answer), None)
            }
            Err(e) => {
                warn!(
                    query_id = %context.query_id,
                    kind = %e.kind(),
                    "Run aborted: {}",
                    e
                );
                if self.config.emit_failure_event {
                    sink.emit_query_failed(AgentEvent::failed(context, &e));
                }
                (None, Some(e))
            }
        };

        let cleanup_warnings = run.artifacts.cleanup().await;
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Run {} finished in {}ms ({} artifacts removed)",
            context.query_id,
            duration_ms,
            run.artifacts.created().saturating_sub(cleanup_warnings.len())
        );

        RunReport {
            query_id: context.query_id.clone(),
            answer,
            error,
            images: run.normalized.len(),
            artifacts_created: run.artifacts.created(),
            cleanup_warnings,
            duration_ms,
        }
    }

    /// Everything between START and REPORT. Any `Err` aborts the run.
    async fn execute(&self, run: &mut RunContext, question: &str) -> Result<String, VqaError> {
        if run.locators.is_empty() {
            return Err(VqaError::InvalidInput(
                "no image locators in `filename`".to_string(),
            ));
        }

        tokio::fs::create_dir_all(run.namer.scratch_dir())
            .await
            .map_err(|e| {
                VqaError::Internal(format!(
                    "Cannot create scratch directory {}: {}",
                    run.namer.scratch_dir().display(),
                    e
                ))
            })?;

        if self.config.concurrency > 1 && run.locators.len() > 1 {
            self.process_concurrent(run).await?;
        } else {
            self.process_sequential(run).await?;
        }

        let template = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_QUESTION_TEMPLATE);
        infer::ask(self.backend.as_ref(), &run.normalized, question, template).await
    }

    /// Fetch and normalise locators one at a time, in input order.
    async fn process_sequential(&self, run: &mut RunContext) -> Result<(), VqaError> {
        for (index, locator) in run.locators.iter().enumerate() {
            let destination = run.namer.download_path(index, locator);
            let image = acquire(
                self.fetcher.as_ref(),
                locator,
                destination,
                self.config.max_dimension,
                &mut run.artifacts,
            )
            .await?;
            run.normalized.push(image);
        }
        Ok(())
    }

    /// Fetch and normalise up to `concurrency` locators at once.
    ///
    /// `buffered` yields results in input order, so the image list matches
    /// the locator list. Each task owns a private artifact set that is merged
    /// into the run's set before any outcome is inspected.
    async fn process_concurrent(&self, run: &mut RunContext) -> Result<(), VqaError> {
        let fetcher = self.fetcher.as_ref();
        let namer = &run.namer;
        let max_dimension = self.config.max_dimension;

        let outcomes: Vec<(ArtifactSet, Result<PathBuf, VqaError>)> =
            stream::iter(run.locators.iter().enumerate().map(|(index, locator)| async move {
                let mut created = ArtifactSet::new();
                let destination = namer.download_path(index, locator);
                let result =
                    acquire(fetcher, locator, destination, max_dimension, &mut created).await;
                (created, result)
            }))
            .buffered(self.config.concurrency)
            .collect()
            .await;

        let mut first_error = None;
        for (created, result) in outcomes {
            run.artifacts.absorb(created);
            match result {
                Ok(image) => run.normalized.push(image),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Fetch one locator and normalise it, registering each file as it appears.
async fn acquire(
    fetcher: &dyn ResourceFetcher,
    locator: &str,
    destination: PathBuf,
    max_dimension: u32,
    artifacts: &mut ArtifactSet,
) -> Result<PathBuf, VqaError> {
    artifacts.reserve(&destination);
    let fetched = fetcher.fetch(locator, &destination).await?;
    artifacts.register(&fetched, ArtifactStage::Download);

    let derivative = derivative_path(&fetched);
    artifacts.reserve(&derivative);
    let normalized = normalize(&fetched, max_dimension).await?;
    if normalized != fetched {
        artifacts.register(&normalized, ArtifactStage::Derivative);
    }
    artifacts.release(&derivative);
    debug!("{} → {}", locator, normalized.display());
    Ok(normalized)
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, VqaError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        VqaError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`), model defaulting
///    to [`DEFAULT_MODEL`].
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **Full auto-detection** (`ProviderFactory::from_env`).
fn resolve_provider(config: &AgentConfig) -> Result<Arc<dyn LLMProvider>, VqaError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| VqaError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set EDGEQUAKE_LLM_PROVIDER and EDGEQUAKE_MODEL, or an API key such as OPENAI_API_KEY.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
