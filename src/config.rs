//! Environment-driven configuration.
//!
//! Every knob the bot reads lives here. `from_env` pulls from process
//! environment variables (a `.env` file is loaded in main via dotenvy);
//! `from_lookup` exists so tests can feed values without touching the
//! process environment.

use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// A required variable is absent.
    Missing(&'static str),
    /// A variable is present but unparsable.
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
    /// The bot mention pattern does not compile.
    InvalidRegex { pattern: String, source: regex::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(key) => write!(f, "missing required environment variable '{key}'"),
            Self::Invalid { key, value, expected } => {
                write!(f, "invalid value '{value}' for '{key}': expected {expected}")
            }
            Self::InvalidRegex { pattern, source } => {
                write!(f, "invalid mention pattern '{pattern}': {source}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidRegex { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct Config {
    pub discord_token: String,
    /// OpenAI API key. Required only when `ai_enabled`.
    pub openai_token: String,
    pub ai_enabled: bool,
    /// System behavior text prepended to every conversation.
    pub behavior: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub tools_enabled: bool,
    pub history_enabled: bool,
    pub history_limit: usize,
    /// Minimum seconds between two admitted messages from one user.
    pub user_cooldown_secs: u64,
    /// Admitted completion requests per guild per calendar day.
    pub guild_daily_limit: u32,
    pub image_analysis_enabled: bool,
    /// Channels the bot talks in without being mentioned.
    pub chat_channels: Vec<u64>,
    /// User allowed to run owner commands.
    pub owner_id: Option<u64>,
    /// Override for the mention token stripped from prompts. When unset the
    /// pattern is derived from the bot's own user id at startup.
    pub mention_pattern: Option<Regex>,
    /// Directory for guild counter files and logs.
    pub data_dir: PathBuf,
    /// Directory holding the canned response tables.
    pub resources_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let discord_token = lookup("DISCORD_BOT_TOKEN")
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::Missing("DISCORD_BOT_TOKEN"))?;

        let ai_enabled = flag(lookup, "AI_ENABLED");
        let openai_token = lookup("OPENAI_API_TOKEN").unwrap_or_default();
        if ai_enabled && openai_token.is_empty() {
            return Err(ConfigError::Missing("OPENAI_API_TOKEN"));
        }

        let mention_pattern = match lookup("BOT_MENTION_PATTERN") {
            Some(pattern) if !pattern.is_empty() => Some(
                Regex::new(&pattern)
                    .map_err(|e| ConfigError::InvalidRegex { pattern, source: e })?,
            ),
            _ => None,
        };

        let chat_channels = match lookup("CHAT_CHANNEL_IDS") {
            Some(raw) if !raw.trim().is_empty() => raw
                .split(',')
                .map(|part| {
                    part.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
                        key: "CHAT_CHANNEL_IDS",
                        value: raw.clone(),
                        expected: "comma-separated channel ids",
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => Vec::new(),
        };

        Ok(Self {
            discord_token,
            openai_token,
            ai_enabled,
            behavior: lookup("AI_BEHAVIOR")
                .unwrap_or_else(|| "You are a sarcastic but good-natured guild mascot. Keep replies short.".to_string()),
            model: lookup("OPENAI_MODEL").unwrap_or_else(|| "gpt-3.5-turbo-0125".to_string()),
            max_tokens: number(lookup, "OPENAI_MAX_TOKENS", 150)?,
            temperature: number(lookup, "OPENAI_TEMPERATURE", 1.0)?,
            top_p: number(lookup, "OPENAI_TOP_P", 1.0)?,
            tools_enabled: flag(lookup, "OPENAI_TOOLS_ENABLED"),
            history_enabled: flag(lookup, "MESSAGE_HISTORY_ENABLED"),
            history_limit: number(lookup, "MESSAGE_HISTORY_LIMIT", 10)?,
            user_cooldown_secs: number(lookup, "USER_COOLDOWN_SECS", 30)?,
            guild_daily_limit: number(lookup, "GUILD_DAILY_LIMIT", 50)?,
            image_analysis_enabled: flag(lookup, "IMAGE_ANALYSIS_ENABLED"),
            chat_channels,
            owner_id: match lookup("OWNER_USER_ID") {
                Some(raw) if !raw.is_empty() => {
                    Some(raw.parse().map_err(|_| ConfigError::Invalid {
                        key: "OWNER_USER_ID",
                        value: raw,
                        expected: "a user id",
                    })?)
                }
                _ => None,
            },
            mention_pattern,
            data_dir: lookup("DATA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from(".")),
            resources_dir: lookup("RESOURCES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("resources")),
        })
    }
}

/// Truthy values match the original deployment: "true", "1", "t".
fn flag(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> bool {
    lookup(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "t"))
        .unwrap_or(false)
}

fn number<T: FromStr + Copy>(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) if !raw.is_empty() => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            value: raw,
            expected: "a number",
        }),
        _ => Ok(default),
    }
}
