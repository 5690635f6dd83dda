//! Conversation assembly: the ordered turn list sent to the backend.

use async_trait::async_trait;
use regex::Regex;
use tracing::warn;

use crate::chatbot::message::IncomingMessage;
use crate::chatbot::tools::ToolInvocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// One role-tagged unit of the conversation prompt.
///
/// The tool plumbing fields stay empty for ordinary turns; the dispatcher
/// fills them when echoing a tool round-trip back to the backend.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub name: Option<String>,
    pub tool_call_id: Option<String>,
    pub tool_calls: Vec<ToolInvocation>,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn named_user(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::plain(Role::User, content)
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// The assistant turn echoing the backend's tool request.
    pub fn tool_request(calls: Vec<ToolInvocation>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(Role::Assistant, "")
        }
    }

    /// A tool-result turn answering one requested call.
    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            name: Some(tool_name.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }
}

/// One prior message from the channel, as supplied by the gateway.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub author_name: String,
    pub author_is_bot: bool,
    pub text: String,
}

/// Source of prior channel messages, newest first, excluding the message
/// currently being handled.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    async fn recent(&self, channel_id: u64) -> Result<Vec<HistoryEntry>, String>;
}

/// Assembles the turn list: system behavior, optional history, current
/// message last.
pub struct ContextBuilder {
    behavior: String,
    mention_pattern: Regex,
    history_enabled: bool,
    history_limit: usize,
}

impl ContextBuilder {
    pub fn new(
        behavior: String,
        mention_pattern: Regex,
        history_enabled: bool,
        history_limit: usize,
    ) -> Self {
        Self {
            behavior,
            mention_pattern,
            history_enabled,
            history_limit,
        }
    }

    pub async fn build(&self, msg: &IncomingMessage, history: &dyn HistoryProvider) -> Vec<Turn> {
        let mut turns = vec![Turn::system(self.behavior.trim())];

        if self.history_enabled {
            turns.extend(self.history_turns(msg.channel_id, history).await);
        }

        let cleaned = self.mention_pattern.replace_all(msg.trimmed_text(), "");
        turns.push(Turn::user(cleaned.trim()));
        turns
    }

    /// Fetch history and map it to turns in chronological order.
    ///
    /// Empty-after-trim messages are dropped before the limit applies, so
    /// blank noise does not eat the history window. A fetch failure just
    /// means no history.
    async fn history_turns(&self, channel_id: u64, history: &dyn HistoryProvider) -> Vec<Turn> {
        let entries = match history.recent(channel_id).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to fetch history for channel {channel_id}: {e}");
                return Vec::new();
            }
        };

        let mut turns: Vec<Turn> = entries
            .iter()
            .filter(|e| !e.text.trim().is_empty())
            .take(self.history_limit)
            .map(|e| {
                if e.author_is_bot {
                    Turn::assistant(e.text.trim())
                } else {
                    Turn::named_user(e.author_name.clone(), e.text.trim())
                }
            })
            .collect();
        turns.reverse();
        turns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FakeHistory(Vec<HistoryEntry>);

    #[async_trait]
    impl HistoryProvider for FakeHistory {
        async fn recent(&self, _channel_id: u64) -> Result<Vec<HistoryEntry>, String> {
            Ok(self.0.clone())
        }
    }

    struct BrokenHistory;

    #[async_trait]
    impl HistoryProvider for BrokenHistory {
        async fn recent(&self, _channel_id: u64) -> Result<Vec<HistoryEntry>, String> {
            Err("channel gone".to_string())
        }
    }

    fn entry(name: &str, bot: bool, text: &str) -> HistoryEntry {
        HistoryEntry {
            author_name: name.to_string(),
            author_is_bot: bot,
            text: text.to_string(),
        }
    }

    fn incoming(text: &str) -> IncomingMessage {
        IncomingMessage {
            author_id: 1,
            guild_id: 2,
            channel_id: 3,
            text: text.to_string(),
            has_attachment: false,
            is_from_bot: false,
        }
    }

    fn builder(history_enabled: bool, limit: usize) -> ContextBuilder {
        ContextBuilder::new(
            "You are a snarky guild mascot.".to_string(),
            Regex::new(r"<@!?555>").unwrap(),
            history_enabled,
            limit,
        )
    }

    #[tokio::test]
    async fn test_history_disabled_gives_two_turns() {
        let b = builder(false, 10);
        let history = FakeHistory(vec![entry("Alice", false, "old chatter")]);

        let turns = b.build(&incoming("what's up"), &history).await;

        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::System);
        assert_eq!(turns[1].role, Role::User);
        assert_eq!(turns[1].content, "what's up");
    }

    #[tokio::test]
    async fn test_history_filtered_capped_chronological() {
        let b = builder(true, 3);
        // Newest first, as a gateway would hand them over. Two are blank
        // after trimming and must not consume the window.
        let history = FakeHistory(vec![
            entry("Alice", false, "fifth"),
            entry("Bot", true, "  "),
            entry("Bob", false, "third"),
            entry("Bot", true, ""),
            entry("Carol", false, "first"),
        ]);

        let turns = b.build(&incoming("now"), &history).await;

        // system + 3 history + user
        assert_eq!(turns.len(), 5);
        assert_eq!(turns[1].content, "first");
        assert_eq!(turns[2].content, "third");
        assert_eq!(turns[3].content, "fifth");
        assert_eq!(turns[4].content, "now");
    }

    #[tokio::test]
    async fn test_bot_history_tagged_assistant() {
        let b = builder(true, 5);
        let history = FakeHistory(vec![
            entry("Alice", false, "human line"),
            entry("Mascot", true, "bot line"),
        ]);

        let turns = b.build(&incoming("q"), &history).await;

        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].name, None);
        assert_eq!(turns[2].role, Role::User);
        assert_eq!(turns[2].name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_mention_token_stripped() {
        let b = builder(false, 0);
        let history = FakeHistory(vec![]);

        let turns = b.build(&incoming("<@555> hello bot"), &history).await;
        assert_eq!(turns[1].content, "hello bot");

        let turns = b.build(&incoming("<@!555> nickname form"), &history).await;
        assert_eq!(turns[1].content, "nickname form");
    }

    #[tokio::test]
    async fn test_fetch_failure_means_no_history() {
        let b = builder(true, 5);

        let turns = b.build(&incoming("hi"), &BrokenHistory).await;

        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].content, "hi");
    }

    #[tokio::test]
    async fn test_content_is_trimmed() {
        let b = builder(true, 5);
        let history = FakeHistory(vec![entry("Alice", false, "  padded  ")]);

        let turns = b.build(&incoming("  also padded  "), &history).await;

        assert_eq!(turns[1].content, "padded");
        assert_eq!(turns[2].content, "also padded");
    }
}
