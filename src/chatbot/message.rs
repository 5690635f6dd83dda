//! The platform-neutral message record fed into the pipeline.

/// An inbound chat message, as handed over by the gateway layer.
///
/// Built once per Discord event in `main.rs` and treated as immutable by
/// everything downstream.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub author_id: u64,
    pub guild_id: u64,
    pub channel_id: u64,
    pub text: String,
    pub has_attachment: bool,
    pub is_from_bot: bool,
}

impl IncomingMessage {
    /// The message text with surrounding whitespace removed.
    pub fn trimmed_text(&self) -> &str {
        self.text.trim()
    }
}
