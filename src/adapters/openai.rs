use super::ScriptGenerator;
use super::http::{self, invalid};
use crate::config::{DurationBounds, Niche};
use crate::error::ServiceError;
use crate::script::Topic;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const SERVICE: &str = "openai";
const MODEL: &str = "gpt-4o-mini";

fn system_prompt(niche: Niche) -> &'static str {
    match niche {
        Niche::Motivation => {
            "You are a viral YouTube Shorts scriptwriter specializing in motivational content. \
             Hook viewers in the first two seconds with a bold statement or question, speak directly \
             to the viewer, give specific practical advice and close with a call to follow."
        }
        Niche::Tech => {
            "You are a viral YouTube Shorts scriptwriter specializing in tech content. \
             Open with a surprising capability, explain it in everyday language, walk through how to \
             use it step by step and close with a call to try it."
        }
        Niche::Facts => {
            "You are a viral YouTube Shorts scriptwriter specializing in fascinating facts. \
             Open with the most surprising fact, build curiosity with every sentence, use comparisons \
             to make numbers relatable and end on an unexpected twist."
        }
        Niche::Finance => {
            "You are a viral YouTube Shorts scriptwriter specializing in personal finance. \
             Open with a specific number, name a common money mistake, give the smarter approach with \
             specifics and close with a call to start today."
        }
        Niche::Entertainment => {
            "You are a viral YouTube Shorts scriptwriter specializing in entertainment. \
             Tease an insider secret, set up the context, tell the story with suspense and finish with \
             a satisfying reveal."
        }
    }
}

fn user_prompt(topic: &Topic, bounds: &DurationBounds) -> String {
    format!(
        "Create a viral YouTube Shorts script about: \"{topic}\"\n\n\
         Requirements:\n\
         1. Make it suitable for a {min:.0}-{max:.0} second video\n\
         2. Write in a conversational, energetic tone\n\
         3. Every sentence should add value or build tension\n\n\
         Output format:\n\
         TITLE: [Catchy title for the Short, max 50 chars]\n\
         DESCRIPTION: [2-3 sentences for the video description]\n\
         HASHTAGS: [5-7 relevant hashtags]\n\n\
         ---SCRIPT START---\n\
         [Your complete script here, ready to be read as voiceover]\n\
         ---SCRIPT END---\n\n\
         SCENE_SUGGESTIONS: [Brief notes on what visuals would work well, comma-separated]",
        topic = topic.title,
        min = bounds.min_seconds,
        max = bounds.max_seconds,
    )
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

fn first_content(response: ChatResponse) -> Result<String, ServiceError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| invalid(SERVICE, "completion had no content"))
}

/// Drafts scripts through the chat completions API.
#[derive(Debug, Clone)]
pub struct OpenAiScriptWriter {
    client: Client,
    api_key: String,
    endpoint: String,
    bounds: DurationBounds,
}

impl OpenAiScriptWriter {
    pub fn new(api_key: impl Into<String>, bounds: DurationBounds, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            client: http::client(SERVICE, timeout)?,
            api_key: api_key.into(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            bounds,
        })
    }
}

#[async_trait]
impl ScriptGenerator for OpenAiScriptWriter {
    async fn generate_script(&self, topic: &Topic) -> Result<String, ServiceError> {
        let prompt = user_prompt(topic, &self.bounds);
        let body = ChatRequest {
            model: MODEL,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt(topic.niche),
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: 0.8,
            max_tokens: 800,
        };
        info!("Requesting script for '{}' from {}", topic.title, MODEL);
        let request = self.client.post(&self.endpoint).bearer_auth(&self.api_key).json(&body);
        let response: ChatResponse = http::send_json(SERVICE, request).await?;
        let content = first_content(response)?;
        debug!("Script response preview: {:.200}", content.replace('\n', " "));
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn prompt_carries_topic_and_bounds() {
        let prompt = user_prompt(
            &Topic::new("habits of millionaires", Niche::Finance),
            &DurationBounds {
                min_seconds: 30.0,
                max_seconds: 60.0,
            },
        );
        assert!(prompt.contains("\"habits of millionaires\""));
        assert!(prompt.contains("30-60 second"));
        assert!(prompt.contains("---SCRIPT START---"));
    }

    #[test]
    fn completion_content_is_extracted() {
        let response: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":"TITLE: Hi"}}]}"#).unwrap();
        assert_eq!(first_content(response).unwrap(), "TITLE: Hi");
    }

    #[test]
    fn empty_completion_is_invalid() {
        let response: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert_eq!(first_content(response).unwrap_err().kind(), ErrorKind::InvalidResponse);
        let response: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert!(first_content(response).is_err());
    }
}
