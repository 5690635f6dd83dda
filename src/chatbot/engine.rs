//! The admission pipeline: length gate, rate limiting, context assembly,
//! dispatch.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::chatbot::context::{ContextBuilder, HistoryProvider, Turn};
use crate::chatbot::dispatch::Dispatcher;
use crate::chatbot::limiter::{Admission, RateLimiter};
use crate::chatbot::message::IncomingMessage;
use crate::chatbot::openai::{self, Backend, SamplingOptions};

/// Messages longer than this (after trimming) never reach the backend.
pub const MAX_PROMPT_CHARS: usize = 250;

/// Reply sent when a user trips the cooldown.
pub const COOLDOWN_REPLY: &str = "Easy there, type slower, I can't keep up.";

/// Reply sent when a guild runs out of daily quota.
pub const QUOTA_REPLY: &str =
    "*yawns* Hmm... time for a little nap to recharge the batteries. Back soon.";

const SMALL_TALK_BEHAVIOR: &str = "You are a bot that occasionally reacts to messages with \
short, sharp, sarcastic one-liners. Keep it brief and just a little mean, but funny.";
const SMALL_TALK_MAX_TOKENS: u32 = 100;

const VISION_MODEL: &str = "gpt-4o-mini";
const DEFAULT_IMAGE_PROMPT: &str =
    "Give a funny, sarcastic interpretation of this image. Describe what you see.";

/// What the pipeline decided for one incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Generated text to send back.
    Text(String),
    /// Trimmed text exceeded [`MAX_PROMPT_CHARS`]; no backend call was made.
    TooLong,
    /// The author is on cooldown.
    RateLimited,
    /// The guild's daily quota is spent.
    QuotaExceeded,
    /// The backend produced nothing usable; caller falls back to a busy line.
    Failed,
}

/// Engine configuration, filled from [`crate::config::Config`] in main.
pub struct EngineConfig {
    pub model: String,
    pub options: SamplingOptions,
    pub tools_enabled: bool,
    pub behavior: String,
    pub mention_pattern: Regex,
    pub history_enabled: bool,
    pub history_limit: usize,
    pub user_cooldown: Duration,
    pub guild_daily_limit: u32,
    pub data_dir: PathBuf,
}

/// The message-admission pipeline, constructed once per process.
pub struct ChatEngine {
    model: String,
    dispatcher: Dispatcher,
    builder: ContextBuilder,
    limiter: Mutex<RateLimiter>,
    backend: Arc<dyn Backend>,
}

impl ChatEngine {
    pub fn new(config: EngineConfig, backend: Arc<dyn Backend>) -> Self {
        let dispatcher = Dispatcher::new(
            backend.clone(),
            config.model.clone(),
            config.options,
            config.tools_enabled,
        );
        let builder = ContextBuilder::new(
            config.behavior,
            config.mention_pattern,
            config.history_enabled,
            config.history_limit,
        );
        // Admissions serialize behind this mutex, which also makes the
        // guild counter's read-modify-write single-writer.
        let limiter = Mutex::new(RateLimiter::new(
            config.user_cooldown,
            config.guild_daily_limit,
            &config.data_dir,
        ));

        Self {
            model: config.model,
            dispatcher,
            builder,
            limiter,
            backend,
        }
    }

    /// Run one message through the pipeline.
    pub async fn respond(&self, msg: &IncomingMessage, history: &dyn HistoryProvider) -> Reply {
        let text = msg.trimmed_text();
        if text.chars().count() > MAX_PROMPT_CHARS {
            info!("Message too long ({} chars), skipping backend call", text.chars().count());
            return Reply::TooLong;
        }

        // Take the lock only for the admission decision; the backend call
        // below must not serialize behind it.
        let admission = self.limiter.lock().await.admit(msg.author_id, msg.guild_id);
        match admission {
            Admission::UserTooFast => {
                warn!("Too many messages from user {}, slow mode on", msg.author_id);
                Reply::RateLimited
            }
            Admission::GuildQuotaExceeded => {
                warn!("Guild {} exhausted its daily quota", msg.guild_id);
                Reply::QuotaExceeded
            }
            Admission::Allowed => {
                let turns = self.builder.build(msg, history).await;
                match self.dispatcher.dispatch(&turns).await {
                    Ok(Some(text)) => Reply::Text(text),
                    Ok(None) => Reply::Failed,
                    Err(e) => {
                        error!("Completion failed: {e}");
                        Reply::Failed
                    }
                }
            }
        }
    }

    /// Unprompted sarcastic one-liner. Bot-initiated, so it bypasses
    /// admission entirely.
    pub async fn small_talk(&self, msg: &IncomingMessage) -> Result<String, openai::Error> {
        let turns = [
            Turn::system(SMALL_TALK_BEHAVIOR),
            Turn::user(msg.trimmed_text()),
        ];
        let outcome = self
            .backend
            .chat(&self.model, &turns, Some(SMALL_TALK_MAX_TOKENS), None)
            .await?;
        outcome.content.ok_or(openai::Error::Empty)
    }

    /// Comment on an attached image. An empty caption falls back to the
    /// default interpretation prompt.
    pub async fn describe_image(
        &self,
        caption: &str,
        image_url: &str,
    ) -> Result<String, openai::Error> {
        let caption = caption.trim();
        let prompt = if caption.is_empty() {
            DEFAULT_IMAGE_PROMPT
        } else {
            caption
        };
        info!("Image URL: {image_url}");
        self.backend.describe_image(VISION_MODEL, prompt, image_url).await
    }
}
