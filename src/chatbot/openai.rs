//! OpenAI API client: plain completions, chat completions with optional
//! tools, and the vision variant used for image commentary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::chatbot::context::Turn;
use crate::chatbot::tools::{ToolDefinition, ToolInvocation};

const API_BASE: &str = "https://api.openai.com/v1";

/// Sampling knobs for the instruct-style completion endpoint.
#[derive(Debug, Clone, Copy)]
pub struct SamplingOptions {
    pub max_tokens: u32,
    pub top_p: f32,
    pub temperature: f32,
}

/// Result of a chat call: generated text, a tool request, or both.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolInvocation>,
}

/// The completion backend the dispatcher talks to.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Instruct-style completion: one prompt string, full sampling options.
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        options: &SamplingOptions,
    ) -> Result<String, Error>;

    /// Chat-style completion over a turn sequence. Tools are advertised
    /// only when `tools` is given; `max_tokens` is omitted when `None`.
    async fn chat(
        &self,
        model: &str,
        turns: &[Turn],
        max_tokens: Option<u32>,
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ChatOutcome, Error>;

    /// Vision chat: one user message carrying a text part and an image URL.
    async fn describe_image(
        &self,
        model: &str,
        prompt: &str,
        image_url: &str,
    ) -> Result<String, Error>;
}

pub struct OpenAiClient {
    api_key: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    top_p: f32,
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<TextChoice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct TextChoice {
    text: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ApiChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Serialize)]
struct ApiChatMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
}

impl ApiChatMessage {
    fn from_turn(turn: &Turn) -> Self {
        let tool_calls = if turn.tool_calls.is_empty() {
            None
        } else {
            Some(turn.tool_calls.iter().map(ApiToolCall::from_invocation).collect())
        };
        // An assistant turn that only carries tool calls has null content.
        let content = if turn.content.is_empty() && tool_calls.is_some() {
            None
        } else {
            Some(turn.content.clone())
        };

        Self {
            role: turn.role.as_str(),
            content,
            name: turn.name.clone(),
            tool_call_id: turn.tool_call_id.clone(),
            tool_calls,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: ApiFunctionCall,
}

impl ApiToolCall {
    fn from_invocation(call: &ToolInvocation) -> Self {
        Self {
            id: call.id.clone(),
            kind: "function".to_string(),
            function: ApiFunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ApiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct ApiTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolDefinition,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl Usage {
    fn log(&self) {
        info!(
            "Costs: {}+{}={}",
            self.prompt_tokens, self.completion_tokens, self.total_tokens
        );
    }
}

#[derive(Serialize)]
struct VisionRequest<'a> {
    model: &'a str,
    messages: Vec<VisionMessage>,
}

#[derive(Serialize)]
struct VisionMessage {
    role: &'static str,
    content: Vec<VisionPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum VisionPart {
    Text { text: String },
    ImageUrl { image_url: ImageRef },
}

#[derive(Serialize)]
struct ImageRef {
    url: String,
}

impl OpenAiClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            http: reqwest::Client::new(),
        }
    }

    async fn post<Req: Serialize, Resp: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Resp, Error> {
        let response = self
            .http
            .post(format!("{API_BASE}/{path}"))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("{status}: {body}")));
        }

        response.json().await.map_err(|e| Error::Parse(e.to_string()))
    }
}

#[async_trait]
impl Backend for OpenAiClient {
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        options: &SamplingOptions,
    ) -> Result<String, Error> {
        let request = CompletionRequest {
            model,
            prompt,
            max_tokens: options.max_tokens,
            top_p: options.top_p,
            temperature: options.temperature,
        };

        let response: CompletionResponse = self.post("completions", &request).await?;
        if let Some(usage) = &response.usage {
            usage.log();
        }

        response
            .choices
            .first()
            .map(|c| c.text.clone())
            .ok_or(Error::Empty)
    }

    async fn chat(
        &self,
        model: &str,
        turns: &[Turn],
        max_tokens: Option<u32>,
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ChatOutcome, Error> {
        let request = ChatRequest {
            model,
            messages: turns.iter().map(ApiChatMessage::from_turn).collect(),
            max_tokens,
            tools: tools.map(|defs| {
                defs.iter()
                    .map(|function| ApiTool { kind: "function", function })
                    .collect()
            }),
            tool_choice: tools.map(|_| "auto"),
        };

        let response: ChatResponse = self.post("chat/completions", &request).await?;
        if let Some(usage) = &response.usage {
            usage.log();
        }

        let choice = response.choices.into_iter().next().ok_or(Error::Empty)?;
        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|c| ToolInvocation {
                id: c.id,
                name: c.function.name,
                arguments: c.function.arguments,
            })
            .collect();

        Ok(ChatOutcome {
            content: choice.message.content,
            tool_calls,
        })
    }

    async fn describe_image(
        &self,
        model: &str,
        prompt: &str,
        image_url: &str,
    ) -> Result<String, Error> {
        let request = VisionRequest {
            model,
            messages: vec![VisionMessage {
                role: "user",
                content: vec![
                    VisionPart::Text {
                        text: prompt.to_string(),
                    },
                    VisionPart::ImageUrl {
                        image_url: ImageRef {
                            url: image_url.to_string(),
                        },
                    },
                ],
            }],
        };

        let response: ChatResponse = self.post("chat/completions", &request).await?;
        if let Some(usage) = &response.usage {
            usage.log();
        }

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(Error::Empty)
    }
}

#[derive(Debug)]
pub enum Error {
    Http(String),
    Api(String),
    Parse(String),
    Empty,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Api(e) => write!(f, "API error: {e}"),
            Error::Parse(e) => write!(f, "Parse error: {e}"),
            Error::Empty => write!(f, "Empty response"),
        }
    }
}

impl std::error::Error for Error {}
