//! The invocation context: what the host hands to a single run.
//!
//! The context is an immutable value threaded through the run. Apart from
//! `params`, the agent treats every field as opaque and echoes it verbatim in
//! each emitted event, including top-level fields it does not know about.

use crate::pipeline::locator;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Input for one image-question run.
///
/// # Example
/// ```rust
/// use edgequake_vqa::InvocationContext;
///
/// let json = r#"{
///     "queryId": "q-1",
///     "agentId": "vision",
///     "webhookGroups": ["ops"],
///     "params": {
///         "filename": "http://h/1.png, http://h/2.png",
///         "specificQuestion": "What color is the car?"
///     }
/// }"#;
/// let ctx: InvocationContext = serde_json::from_str(json).unwrap();
/// assert_eq!(ctx.locators(','), vec!["http://h/1.png", "http://h/2.png"]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationContext {
    /// Correlation id carried by every event of the run.
    pub query_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_groups: Option<Value>,

    pub params: QueryParams,

    /// Any other top-level fields supplied by the host.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The two parameters the agent actually interprets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    /// One or more image locators joined by the configured separator.
    pub filename: String,

    /// The question asked about the images.
    pub specific_question: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InvocationContext {
    pub fn new(
        query_id: impl Into<String>,
        filename: impl Into<String>,
        question: impl Into<String>,
    ) -> Self {
        Self {
            query_id: query_id.into(),
            agent_id: None,
            webhook_groups: None,
            params: QueryParams {
                filename: filename.into(),
                specific_question: question.into(),
                extra: Map::new(),
            },
            extra: Map::new(),
        }
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_webhook_groups(mut self, groups: Value) -> Self {
        self.webhook_groups = Some(groups);
        self
    }

    /// The question text, verbatim.
    pub fn question(&self) -> &str {
        &self.params.specific_question
    }

    /// Split `params.filename` into an ordered list of locators.
    pub fn locators(&self, separator: char) -> Vec<String> {
        locator::parse_locators(&self.params.filename, separator)
    }
}
