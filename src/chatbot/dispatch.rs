//! Backend selection and the optional tool round-trip.

use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::chatbot::context::Turn;
use crate::chatbot::openai::{self, Backend, SamplingOptions};
use crate::chatbot::tools::{self, SupportedTool, ToolError};

/// Model family served by the plain completion endpoint. No chat history,
/// full sampling options.
pub const INSTRUCT_MODEL: &str = "gpt-3.5-turbo-instruct";

/// Model family served by the chat endpoint. Turn sequence, max_tokens only.
pub const CHAT_MODEL: &str = "gpt-3.5-turbo-0125";

#[derive(Debug)]
pub enum DispatchError {
    /// The backend call itself failed.
    Backend(openai::Error),
    /// The backend requested a tool we do not have.
    UnknownTool(String),
    /// The backend sent arguments a known tool could not parse.
    Tool(ToolError),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(e) => write!(f, "backend call failed: {e}"),
            Self::UnknownTool(name) => write!(f, "backend requested unknown tool '{name}'"),
            Self::Tool(e) => write!(f, "tool execution failed: {e}"),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Backend(e) => Some(e),
            Self::Tool(e) => Some(e),
            Self::UnknownTool(_) => None,
        }
    }
}

impl From<openai::Error> for DispatchError {
    fn from(e: openai::Error) -> Self {
        Self::Backend(e)
    }
}

/// Routes a composed conversation to the right backend call.
pub struct Dispatcher {
    backend: Arc<dyn Backend>,
    model: String,
    options: SamplingOptions,
    tools_enabled: bool,
}

impl Dispatcher {
    pub fn new(
        backend: Arc<dyn Backend>,
        model: String,
        options: SamplingOptions,
        tools_enabled: bool,
    ) -> Self {
        Self {
            backend,
            model,
            options,
            tools_enabled,
        }
    }

    /// Issue the completion request for a turn sequence.
    ///
    /// `Ok(None)` means the model id matched no known family; errors are
    /// backend or tool failures.
    pub async fn dispatch(&self, turns: &[Turn]) -> Result<Option<String>, DispatchError> {
        if self.model.contains(INSTRUCT_MODEL) {
            let prompt = flatten(turns);
            let text = self
                .backend
                .complete(&self.model, &prompt, &self.options)
                .await?;
            Ok(Some(text))
        } else if self.model.contains(CHAT_MODEL) {
            self.chat(turns).await
        } else {
            warn!("Model '{}' matches no known family, skipping", self.model);
            Ok(None)
        }
    }

    async fn chat(&self, turns: &[Turn]) -> Result<Option<String>, DispatchError> {
        let tools = self.tools_enabled.then(tools::tool_definitions);
        let outcome = self
            .backend
            .chat(&self.model, turns, Some(self.options.max_tokens), tools.as_deref())
            .await?;

        if outcome.tool_calls.is_empty() {
            return Ok(outcome.content);
        }

        // One round-trip: echo the request, answer every call, then ask
        // again with no tools on offer.
        let mut followup: Vec<Turn> = turns.to_vec();
        followup.push(Turn::tool_request(outcome.tool_calls.clone()));
        for call in &outcome.tool_calls {
            let tool = SupportedTool::from_name(&call.name)
                .ok_or_else(|| DispatchError::UnknownTool(call.name.clone()))?;
            let result = tools::execute(tool, &call.arguments).map_err(DispatchError::Tool)?;
            followup.push(Turn::tool_result(call.id.clone(), call.name.clone(), result));
        }

        let second = self.backend.chat(&self.model, &followup, None, None).await?;
        Ok(second.content)
    }
}

/// Collapse a turn sequence into the single prompt string the instruct
/// endpoint takes.
fn flatten(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| t.content.as_str())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chatbot::context::Turn;

    #[test]
    fn test_flatten_joins_contents() {
        let turns = [
            Turn::system("behave"),
            Turn::user("earlier"),
            Turn::user("question"),
        ];
        assert_eq!(flatten(&turns), "behave\n\nearlier\n\nquestion");
    }

    #[test]
    fn test_flatten_skips_empty_contents() {
        let turns = [Turn::system("behave"), Turn::assistant(""), Turn::user("q")];
        assert_eq!(flatten(&turns), "behave\n\nq");
    }
}
