//! Prompt text for image question answering.
//!
//! Callers can override the template via
//! [`crate::config::AgentConfig::system_prompt`]; the constant here is used
//! only when no override is provided.

/// Placeholder replaced with the caller's question.
pub const QUESTION_PLACEHOLDER: &str = "{question}";

/// Default instruction wrapped around the question.
pub const DEFAULT_QUESTION_TEMPLATE: &str =
    "Given the attached images answer the following question: {question}";

/// Build the prompt for `question` from `template`.
///
/// The question is inserted verbatim. A template without the placeholder
/// gets the question appended on a new line so it is never silently lost.
pub fn question_prompt(template: &str, question: &str) -> String {
    if template.contains(QUESTION_PLACEHOLDER) {
        template.replacen(QUESTION_PLACEHOLDER, question, 1)
    } else {
        format!("{template}\n\n{question}")
    }
}
