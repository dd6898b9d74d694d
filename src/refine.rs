//! Question refinement: one model call that rewrites the user's question
//! into a single clear query about the documents in scope.

use crate::error::{Error, Result};
use crate::llm::LanguageModel;

/// Describe the documents a question is about, for prompts and history.
///
/// Names the selected files, or all uploaded files when none are selected.
pub fn file_context(selected: &[String], all: &[String]) -> String {
    if selected.is_empty() {
        format!("all uploaded files: {}", all.join(", "))
    } else {
        selected.join(", ")
    }
}

pub fn refine_prompt(question: &str, selected: &[String], all: &[String]) -> String {
    let context = file_context(selected, all);
    format!(
        "Refine this question into a single, clear, and concise query to be answered in one \
         cohesive response, correcting any spelling mistakes or short forms and ensuring it \
         relates to the documents considering the following files: {context}. If no relevant \
         content exists in the documents, indicate that and provide a general answer if \
         possible.\n\nUser's question: {question}\n\nReturn the final refined question or response:"
    )
}

/// Rewrite `question` with one model call. The output is trimmed.
pub async fn refine(
    model: &dyn LanguageModel,
    question: &str,
    selected: &[String],
    all: &[String],
) -> Result<String> {
    let prompt = refine_prompt(question, selected, all);
    let refined = model
        .generate(&prompt)
        .await
        .map_err(|e| Error::GenerationFailure(format!("question refinement: {:#}", e)))?;
    let refined = refined.trim();
    if refined.is_empty() {
        return Ok(question.trim().to_string());
    }
    tracing::debug!(refined, "refined question");
    Ok(refined.to_string())
}
