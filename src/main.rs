mod chatbot;
mod config;
mod responses;
mod split;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serenity::all::{
    ChannelId, Client, Context, EventHandler, GatewayIntents, GetMessages, Message, MessageId,
    ReactionType, Ready, ShardManager, UserId,
};
use serenity::http::Http;
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::*;

use chatbot::{
    ChatEngine, EngineConfig, HistoryEntry, HistoryProvider, IncomingMessage, OpenAiClient,
    Reply, SamplingOptions, COOLDOWN_REPLY, QUOTA_REPLY,
};
use config::Config;
use responses::ResponseTables;

/// Chance of an unprompted sarcastic reply to ordinary chatter.
const SMALL_TALK_CHANCE: f64 = 0.1;

/// Pause behind the typing indicator before each sentence chunk.
const CHUNK_DELAY: Duration = Duration::from_secs(2);

/// Pause before a canned attachment reply.
const ATTACHMENT_DELAY: Duration = Duration::from_secs(3);

const ATTACHMENT_EMOJI: &str = "🎨";

/// Everything that needs the gateway's `Ready` payload before it exists.
struct BotState {
    engine: ChatEngine,
    bot_id: UserId,
}

struct Handler {
    config: Config,
    responses: ResponseTables,
    state: OnceLock<BotState>,
    shards: Arc<OnceLock<Arc<ShardManager>>>,
}

/// Channel history source backed by the Discord REST API. Fetches one page
/// of messages older than the triggering one.
struct DiscordHistory {
    http: Arc<Http>,
    before: MessageId,
    limit: u8,
}

#[async_trait]
impl HistoryProvider for DiscordHistory {
    async fn recent(&self, channel_id: u64) -> Result<Vec<HistoryEntry>, String> {
        let builder = GetMessages::new().before(self.before).limit(self.limit);
        let messages = ChannelId::new(channel_id)
            .messages(&self.http, builder)
            .await
            .map_err(|e| format!("history fetch failed: {e}"))?;

        Ok(messages
            .into_iter()
            .map(|m| HistoryEntry {
                author_name: m.author.name.clone(),
                author_is_bot: m.author.bot,
                text: m.content,
            })
            .collect())
    }
}

fn incoming_message(msg: &Message, guild_id: u64) -> IncomingMessage {
    IncomingMessage {
        author_id: msg.author.id.get(),
        guild_id,
        channel_id: msg.channel_id.get(),
        text: msg.content.clone(),
        has_attachment: !msg.attachments.is_empty(),
        is_from_bot: msg.author.bot,
    }
}

/// Send a reply one sentence at a time behind a typing indicator.
async fn send_chunked(ctx: &Context, channel_id: ChannelId, text: &str) {
    for sentence in split::split_sentences(text) {
        let _ = channel_id.broadcast_typing(&ctx.http).await;
        tokio::time::sleep(CHUNK_DELAY).await;
        if let Err(e) = channel_id.say(&ctx.http, sentence).await {
            warn!("Failed to send chunk: {e}");
        }
    }
}

impl Handler {
    async fn reply(&self, ctx: &Context, msg: &Message, text: &str) {
        if let Err(e) = msg.reply(&ctx.http, text).await {
            warn!("Failed to reply: {e}");
        }
    }

    async fn handle_chat(
        &self,
        ctx: &Context,
        msg: &Message,
        incoming: IncomingMessage,
        state: &BotState,
    ) {
        if !self.config.ai_enabled {
            info!("AI is turned off, sending a busy line");
            self.reply(ctx, msg, self.responses.busy_line()).await;
            return;
        }

        let history = DiscordHistory {
            http: ctx.http.clone(),
            before: msg.id,
            limit: self.config.history_limit.min(100) as u8,
        };

        match state.engine.respond(&incoming, &history).await {
            Reply::Text(text) => {
                info!("Reply for \"{}\": {text}", incoming.trimmed_text());
                send_chunked(ctx, msg.channel_id, &text).await;
            }
            Reply::RateLimited => self.reply(ctx, msg, COOLDOWN_REPLY).await,
            Reply::QuotaExceeded => self.reply(ctx, msg, QUOTA_REPLY).await,
            Reply::TooLong | Reply::Failed => {
                self.reply(ctx, msg, self.responses.busy_line()).await;
            }
        }
    }

    async fn handle_attachment(&self, ctx: &Context, msg: &Message, state: &BotState) {
        if let Err(e) = msg
            .react(&ctx.http, ReactionType::Unicode(ATTACHMENT_EMOJI.to_string()))
            .await
        {
            warn!("Failed to react to attachment: {e}");
        }

        if self.config.ai_enabled && self.config.image_analysis_enabled {
            let Some(attachment) = msg.attachments.first() else {
                return;
            };
            let _ = msg.channel_id.broadcast_typing(&ctx.http).await;
            match state.engine.describe_image(&msg.content, &attachment.url).await {
                Ok(text) => send_chunked(ctx, msg.channel_id, &text).await,
                Err(e) => {
                    error!("Image analysis failed: {e}");
                    self.reply(ctx, msg, self.responses.busy_line()).await;
                }
            }
            return;
        }

        match self.responses.attachment_line() {
            Some(line) => {
                let _ = msg.channel_id.broadcast_typing(&ctx.http).await;
                tokio::time::sleep(ATTACHMENT_DELAY).await;
                self.reply(ctx, msg, line).await;
            }
            // The one case we are allowed to stay quiet.
            None => info!("No attachment response configured, skipping"),
        }
    }

    async fn maybe_small_talk(
        &self,
        ctx: &Context,
        msg: &Message,
        incoming: IncomingMessage,
        state: &BotState,
    ) {
        if !self.config.ai_enabled || incoming.is_from_bot {
            return;
        }

        let roll: f64 = rand::random();
        if roll >= SMALL_TALK_CHANCE {
            debug!("No reaction, roll {roll:.2} decided");
            return;
        }

        match state.engine.small_talk(&incoming).await {
            Ok(line) => {
                info!("Small talk (roll {roll:.2}) for \"{}\": {line}", incoming.trimmed_text());
                if let Err(e) = msg.channel_id.say(&ctx.http, line).await {
                    warn!("Failed to send small talk: {e}");
                }
            }
            Err(e) => warn!("Small talk failed: {e}"),
        }
    }

    async fn command_say(&self, ctx: &Context, text: &str) {
        if text.trim().is_empty() {
            info!("Nothing to relay for !say");
            return;
        }
        let Some(&channel) = self.config.chat_channels.first() else {
            error!("No chat channel configured for !say");
            return;
        };

        match ChannelId::new(channel).say(&ctx.http, text).await {
            Ok(_) => info!("Relayed to channel {channel}: {text}"),
            Err(e) => error!("Failed to relay message: {e}"),
        }
    }

    async fn command_shutdown(&self, ctx: &Context, msg: &Message) {
        if self.config.owner_id != Some(msg.author.id.get()) {
            info!("Shutdown attempt by user {}", msg.author.id);
            self.reply(ctx, msg, "You don't have permission for that.").await;
            return;
        }

        info!("Bot was shut down by its owner");
        self.reply(ctx, msg, "Powering down. Bye!").await;
        if let Some(shards) = self.shards.get() {
            shards.shutdown_all().await;
        }
    }
}

#[serenity::async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("---------------------------------------------------------------");
        info!("Logged in as {} ({})", ready.user.name, ready.user.id);
        info!("AI enabled: {}", self.config.ai_enabled);
        info!(
            "Message history enabled: {} (limit {})",
            self.config.history_enabled, self.config.history_limit
        );
        info!("Model: {}", self.config.model);
        info!(
            "Max tokens: {}, temperature: {}, top p: {}",
            self.config.max_tokens, self.config.temperature, self.config.top_p
        );
        info!(
            "User cooldown: {}s, guild daily limit: {}",
            self.config.user_cooldown_secs, self.config.guild_daily_limit
        );
        info!("Image analysis enabled: {}", self.config.image_analysis_enabled);
        info!("Bot is in {} guild(s)", ready.guilds.len());
        info!("---------------------------------------------------------------");

        let mention_pattern = self.config.mention_pattern.clone().unwrap_or_else(|| {
            Regex::new(&format!(r"<@!?{}>", ready.user.id.get()))
                .expect("derived mention pattern is valid")
        });

        let backend = Arc::new(OpenAiClient::new(self.config.openai_token.clone()));
        let engine = ChatEngine::new(
            EngineConfig {
                model: self.config.model.clone(),
                options: SamplingOptions {
                    max_tokens: self.config.max_tokens,
                    top_p: self.config.top_p,
                    temperature: self.config.temperature,
                },
                tools_enabled: self.config.tools_enabled,
                behavior: self.config.behavior.clone(),
                mention_pattern,
                history_enabled: self.config.history_enabled,
                history_limit: self.config.history_limit,
                user_cooldown: Duration::from_secs(self.config.user_cooldown_secs),
                guild_daily_limit: self.config.guild_daily_limit,
                data_dir: self.config.data_dir.clone(),
            },
            backend,
        );

        if self.state.set(BotState { engine, bot_id: ready.user.id }).is_err() {
            info!("Reconnected, keeping the existing engine");
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        let Some(state) = self.state.get() else {
            return;
        };

        if let Some(text) = msg.content.strip_prefix("!say ") {
            self.command_say(&ctx, text).await;
            return;
        }
        if msg.content.trim() == "!shutdown" {
            self.command_shutdown(&ctx, &msg).await;
            return;
        }

        let Some(guild_id) = msg.guild_id else {
            return;
        };
        let incoming = incoming_message(&msg, guild_id.get());

        if incoming.has_attachment {
            self.handle_attachment(&ctx, &msg, state).await;
            return;
        }

        if incoming.trimmed_text().is_empty() {
            return;
        }

        let mentioned = msg.mentions.iter().any(|u| u.id == state.bot_id);
        let in_chat_channel = self.config.chat_channels.contains(&incoming.channel_id);

        if in_chat_channel || mentioned {
            self.handle_chat(&ctx, &msg, incoming, state).await;
            return;
        }

        self.maybe_small_talk(&ctx, &msg, incoming, state).await;
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    // Setup logging: stdout plus a file under data_dir/logs.
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("banter.log"))
        .expect("Failed to open log file");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    info!("🚀 Starting banter...");

    let responses = ResponseTables::load(&config.resources_dir);
    let token = config.discord_token.clone();
    let shards: Arc<OnceLock<Arc<ShardManager>>> = Arc::new(OnceLock::new());

    let handler = Handler {
        config,
        responses,
        state: OnceLock::new(),
        shards: shards.clone(),
    };

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::DIRECT_MESSAGES;

    let mut client = Client::builder(&token, intents)
        .event_handler(handler)
        .await
        .expect("Failed to create Discord client");

    let _ = shards.set(client.shard_manager.clone());

    if let Err(e) = client.start().await {
        error!("Client error: {e}");
    }
}
