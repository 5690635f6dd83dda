//! Tool definitions advertised to the chat backend, and the typed registry
//! used to resolve tool calls coming back.

use serde::Deserialize;
use std::fmt;

/// A tool advertised to the backend.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A tool call requested by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments, exactly as returned by the backend.
    pub arguments: String,
}

/// Tools this bot knows how to run.
///
/// Resolving a name through [`SupportedTool::from_name`] is the only way a
/// backend-requested call reaches execution; an unknown name stays an error
/// at the call site instead of a missing map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedTool {
    GetUserActivity,
}

impl SupportedTool {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "get_user_activity" => Some(Self::GetUserActivity),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::GetUserActivity => "get_user_activity",
        }
    }
}

/// Errors from argument parsing during tool execution.
#[derive(Debug)]
pub enum ToolError {
    BadArguments {
        tool: &'static str,
        source: serde_json::Error,
    },
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadArguments { tool, source } => {
                write!(f, "bad arguments for tool '{tool}': {source}")
            }
        }
    }
}

impl std::error::Error for ToolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::BadArguments { source, .. } => Some(source),
        }
    }
}

#[derive(Deserialize)]
struct UserActivityArgs {
    user_id: String,
}

/// Run a resolved tool against its raw JSON arguments.
pub fn execute(tool: SupportedTool, arguments: &str) -> Result<String, ToolError> {
    match tool {
        SupportedTool::GetUserActivity => {
            let args: UserActivityArgs =
                serde_json::from_str(arguments).map_err(|e| ToolError::BadArguments {
                    tool: tool.name(),
                    source: e,
                })?;
            // Activity tracking is not wired to a data source; report that
            // honestly rather than inventing history.
            Ok(format!("No tracked activity for user {}.", args.user_id))
        }
    }
}

/// The tool definitions advertised on tool-enabled chat requests.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![ToolDefinition {
        name: "get_user_activity".to_string(),
        description: "Get user's activity".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "user_id": {
                    "type": "string",
                    "description": "User ID, always found in format <@1234567890>"
                }
            },
            "required": ["user_id"]
        }),
    }]
}
