//! Extracting the names of people introduced in a transcript with a
//! chat-completion model.

use crate::config::OpenAiConfig;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the model is told to answer when nobody is introduced.
pub const NO_NAMES_SENTINEL: &str = "Name not mentioned";

#[derive(Debug, thiserror::Error)]
pub enum NameExtractionError {
    #[error("chat completion request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("chat completion service returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("chat completion had no usable content")]
    EmptyCompletion,
    #[error("could not parse a list of names from: {0}")]
    UnparsableNames(String),
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

pub fn prompt(transcript: &str) -> String {
    format!(
        "List the names of every person who is introduced or addressed by name in the \
         conversation below. Reply with a JSON array of strings and nothing else. If no \
         names are mentioned, reply with [\"{NO_NAMES_SENTINEL}\"].\n\nConversation: \"{transcript}\""
    )
}

/// Pulls the names out of a completion's text.
///
/// The outermost `[...]` is decoded as a JSON array of strings, so code
/// fences or chatter around the array are ignored. The no-names sentinel,
/// blanks, duplicates and anything in `exclude` (case-insensitive) are dropped.
pub fn parse_names(content: &str, exclude: &[String]) -> Result<Vec<String>, NameExtractionError> {
    let unparsable = || NameExtractionError::UnparsableNames(content.to_string());

    let start = content.find('[').ok_or_else(unparsable)?;
    let end = content.rfind(']').filter(|end| *end > start).ok_or_else(unparsable)?;
    let raw: Vec<String> = serde_json::from_str(&content[start..=end]).map_err(|_| unparsable())?;

    let mut names: Vec<String> = Vec::with_capacity(raw.len());
    for name in raw {
        let name = name.trim();
        if name.is_empty()
            || name.eq_ignore_ascii_case(NO_NAMES_SENTINEL)
            || exclude.iter().any(|x| x.trim().eq_ignore_ascii_case(name))
            || names.iter().any(|seen| seen.eq_ignore_ascii_case(name))
        {
            continue;
        }
        names.push(name.to_string());
    }
    Ok(names)
}

#[derive(Clone)]
pub struct NameExtractionClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl NameExtractionClient {
    /// # Errors
    /// Fails if the HTTP client can't be constructed.
    pub fn new(config: &OpenAiConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.chat_model.clone(),
        })
    }

    /// Asks the model for the people introduced in `transcript`.
    ///
    /// # Errors
    /// Transport failures, non-2xx replies, and completions that don't
    /// contain a JSON array of strings.
    #[tracing::instrument(skip_all, fields(model = %self.model))]
    pub async fn extract(&self, transcript: &str, exclude: &[String]) -> Result<Vec<String>, NameExtractionError> {
        let prompt = prompt(transcript);
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: &prompt,
            }],
            temperature: 0.0,
        };

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".into());
            return Err(NameExtractionError::Api { status, body });
        }

        let completion: ChatResponse = response.json().await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(NameExtractionError::EmptyCompletion)?;

        let names = parse_names(&content, exclude)?;
        tracing::debug!(names = names.len(), "extracted names");
        Ok(names)
    }
}
