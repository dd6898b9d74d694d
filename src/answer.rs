//! Grounded answer generation with a general-knowledge fallback.
//!
//! The model is asked for a JSON object `{"grounded": bool, "answer": str}`.
//! When the reply is not valid JSON, the raw text becomes the answer and
//! groundedness is inferred from marker phrases. An ungrounded answer gets
//! a second, document-free model call whose output is appended under a
//! `**General Knowledge Result:**` label. When retrieval returned nothing
//! the grounded call is skipped and only the fallback runs.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::llm::LanguageModel;
use crate::memory::Turn;
use crate::models::RetrievedChunk;

/// Phrases that mark an answer as not supported by the documents.
pub const NOT_GROUNDED_MARKERS: [&str; 2] = ["no relevant content", "not in the documents"];

pub const FALLBACK_LABEL: &str = "**General Knowledge Result:**";

#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub chunk_id: String,
    pub filename: String,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub grounded: bool,
    /// Passages the grounded call was given, best first.
    pub sources: Vec<Source>,
    /// Output of the general-knowledge call, when it was made.
    pub fallback: Option<String>,
}

#[derive(Deserialize)]
struct GroundedReply {
    grounded: bool,
    answer: String,
}

pub fn grounded_prompt(question: &str, passages: &[RetrievedChunk], history: &[Turn]) -> String {
    let mut prompt = String::from(
        "Answer the question using only the document passages below. Reply with a single JSON \
         object of the form {\"grounded\": true, \"answer\": \"...\"}. Set \"grounded\" to false \
         and say there is no relevant content if the passages do not contain the answer.\n",
    );

    if !history.is_empty() {
        prompt.push_str("\nConversation so far:\n");
        for turn in history {
            prompt.push_str(&format!("{}: {}\n", turn.speaker.label(), turn.text));
        }
    }

    prompt.push_str("\nPassages:\n");
    for (i, p) in passages.iter().enumerate() {
        prompt.push_str(&format!(
            "[{}] ({}, part {})\n{}\n\n",
            i + 1,
            p.chunk.source,
            p.chunk.chunk_index + 1,
            p.chunk.text
        ));
    }

    prompt.push_str(&format!("Question: {}\n", question));
    prompt
}

pub fn fallback_prompt(question: &str) -> String {
    format!(
        "The uploaded documents do not answer the following question. Answer it from general \
         knowledge, and say so briefly.\n\nQuestion: {}",
        question
    )
}

/// True if `text` contains a not-grounded marker phrase (case-insensitive).
pub fn has_not_grounded_marker(text: &str) -> bool {
    let lower = text.to_lowercase();
    NOT_GROUNDED_MARKERS.iter().any(|m| lower.contains(m))
}

/// Interpret a grounded-call reply as `(answer, grounded)`.
pub fn parse_reply(raw: &str) -> (String, bool) {
    if let Some(json) = first_json_object(raw) {
        if let Ok(reply) = serde_json::from_str::<GroundedReply>(json) {
            let answer = reply.answer.trim().to_string();
            let grounded = reply.grounded && !answer.is_empty();
            return (answer, grounded);
        }
    }
    let text = raw.trim().to_string();
    let grounded = !text.is_empty() && !has_not_grounded_marker(&text);
    (text, grounded)
}

/// The first balanced `{...}` span, honouring JSON string escapes.
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Answer `question` from `passages`, falling back to general knowledge.
pub async fn answer(
    model: &dyn LanguageModel,
    question: &str,
    passages: &[RetrievedChunk],
    history: &[Turn],
) -> Result<Answer> {
    let sources: Vec<Source> = passages
        .iter()
        .map(|p| Source {
            chunk_id: p.chunk.id.clone(),
            filename: p.chunk.source.clone(),
            score: p.score,
        })
        .collect();

    let (grounded_text, grounded) = if passages.is_empty() {
        tracing::info!("no passages retrieved, using general knowledge");
        (None, false)
    } else {
        let raw = model
            .generate(&grounded_prompt(question, passages, history))
            .await
            .map_err(|e| Error::GenerationFailure(format!("answer: {:#}", e)))?;
        let (text, grounded) = parse_reply(&raw);
        (Some(text), grounded)
    };

    if grounded {
        return Ok(Answer {
            text: grounded_text.unwrap_or_default(),
            grounded: true,
            sources,
            fallback: None,
        });
    }

    let fallback = model
        .generate(&fallback_prompt(question))
        .await
        .map_err(|e| Error::GenerationFailure(format!("general knowledge fallback: {:#}", e)))?;
    let fallback = fallback.trim().to_string();

    let text = match grounded_text.filter(|t| !t.is_empty()) {
        Some(t) => format!("{}\n\n{} {}", t, FALLBACK_LABEL, fallback),
        None => format!("{} {}", FALLBACK_LABEL, fallback),
    };

    Ok(Answer {
        text,
        grounded: false,
        sources,
        fallback: Some(fallback),
    })
}
