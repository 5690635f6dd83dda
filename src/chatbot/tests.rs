//! Pipeline tests for the chatbot module, driven through a recording fake
//! backend.

use super::*;
use async_trait::async_trait;
use regex::Regex;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use crate::chatbot::context::{HistoryEntry, HistoryProvider, Role, Turn};
use crate::chatbot::dispatch::{DispatchError, Dispatcher};
use crate::chatbot::engine::{ChatEngine, EngineConfig, Reply, MAX_PROMPT_CHARS};
use crate::chatbot::openai::{self, Backend, ChatOutcome, SamplingOptions};
use crate::chatbot::tools::ToolInvocation;

// =============================================================================
// TEST DOUBLES
// =============================================================================

#[derive(Debug, Clone)]
enum RecordedCall {
    Complete {
        model: String,
        prompt: String,
        max_tokens: u32,
        top_p: f32,
        temperature: f32,
    },
    Chat {
        model: String,
        turns: Vec<Turn>,
        max_tokens: Option<u32>,
        had_tools: bool,
    },
    Vision {
        model: String,
        prompt: String,
        image_url: String,
    },
}

/// Backend fake that records every call and replays scripted outcomes.
struct FakeBackend {
    calls: Mutex<Vec<RecordedCall>>,
    chat_script: Mutex<VecDeque<ChatOutcome>>,
    completion_text: String,
    fail: bool,
}

impl FakeBackend {
    /// Always answers with the given text.
    fn text(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            chat_script: Mutex::new(VecDeque::new()),
            completion_text: reply.to_string(),
            fail: false,
        })
    }

    /// Replays the given chat outcomes in order.
    fn scripted(outcomes: Vec<ChatOutcome>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            chat_script: Mutex::new(outcomes.into()),
            completion_text: String::new(),
            fail: false,
        })
    }

    /// Every call fails at the HTTP layer.
    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            chat_script: Mutex::new(VecDeque::new()),
            completion_text: String::new(),
            fail: true,
        })
    }

    fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn next_outcome(&self) -> ChatOutcome {
        self.chat_script.lock().unwrap().pop_front().unwrap_or(ChatOutcome {
            content: Some(self.completion_text.clone()),
            tool_calls: Vec::new(),
        })
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        options: &SamplingOptions,
    ) -> Result<String, openai::Error> {
        if self.fail {
            return Err(openai::Error::Http("connection refused".to_string()));
        }
        self.calls.lock().unwrap().push(RecordedCall::Complete {
            model: model.to_string(),
            prompt: prompt.to_string(),
            max_tokens: options.max_tokens,
            top_p: options.top_p,
            temperature: options.temperature,
        });
        Ok(self.completion_text.clone())
    }

    async fn chat(
        &self,
        model: &str,
        turns: &[Turn],
        max_tokens: Option<u32>,
        tools: Option<&[crate::chatbot::tools::ToolDefinition]>,
    ) -> Result<ChatOutcome, openai::Error> {
        if self.fail {
            return Err(openai::Error::Http("connection refused".to_string()));
        }
        self.calls.lock().unwrap().push(RecordedCall::Chat {
            model: model.to_string(),
            turns: turns.to_vec(),
            max_tokens,
            had_tools: tools.is_some(),
        });
        Ok(self.next_outcome())
    }

    async fn describe_image(
        &self,
        model: &str,
        prompt: &str,
        image_url: &str,
    ) -> Result<String, openai::Error> {
        if self.fail {
            return Err(openai::Error::Http("connection refused".to_string()));
        }
        self.calls.lock().unwrap().push(RecordedCall::Vision {
            model: model.to_string(),
            prompt: prompt.to_string(),
            image_url: image_url.to_string(),
        });
        Ok(self.completion_text.clone())
    }
}

struct NoHistory;

#[async_trait]
impl HistoryProvider for NoHistory {
    async fn recent(&self, _channel_id: u64) -> Result<Vec<HistoryEntry>, String> {
        Ok(Vec::new())
    }
}

fn incoming(text: &str) -> IncomingMessage {
    IncomingMessage {
        author_id: 11,
        guild_id: 22,
        channel_id: 33,
        text: text.to_string(),
        has_attachment: false,
        is_from_bot: false,
    }
}

fn options() -> SamplingOptions {
    SamplingOptions {
        max_tokens: 150,
        top_p: 0.9,
        temperature: 0.7,
    }
}

fn engine(
    backend: Arc<FakeBackend>,
    model: &str,
    cooldown: Duration,
    daily_limit: u32,
    dir: &TempDir,
) -> ChatEngine {
    ChatEngine::new(
        EngineConfig {
            model: model.to_string(),
            options: options(),
            tools_enabled: false,
            behavior: "You are a snarky guild mascot.".to_string(),
            mention_pattern: Regex::new(r"<@!?555>").unwrap(),
            history_enabled: false,
            history_limit: 10,
            user_cooldown: cooldown,
            guild_daily_limit: daily_limit,
            data_dir: dir.path().to_path_buf(),
        },
        backend,
    )
}

fn tool_call(id: &str, name: &str, arguments: &str) -> ToolInvocation {
    ToolInvocation {
        id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.to_string(),
    }
}

// =============================================================================
// ADMISSION PIPELINE
// =============================================================================

mod admission {
    use super::*;

    #[tokio::test]
    async fn test_too_long_skips_backend() {
        let backend = FakeBackend::text("never sent");
        let dir = TempDir::new().unwrap();
        let engine = engine(backend.clone(), "gpt-3.5-turbo-0125", Duration::ZERO, 10, &dir);

        let reply = engine
            .respond(&incoming(&"x".repeat(MAX_PROMPT_CHARS + 1)), &NoHistory)
            .await;

        assert_eq!(reply, Reply::TooLong);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_max_length_is_still_admitted() {
        let backend = FakeBackend::text("ok");
        let dir = TempDir::new().unwrap();
        let engine = engine(backend.clone(), "gpt-3.5-turbo-0125", Duration::ZERO, 10, &dir);

        let reply = engine
            .respond(&incoming(&"x".repeat(MAX_PROMPT_CHARS)), &NoHistory)
            .await;

        assert_eq!(reply, Reply::Text("ok".to_string()));
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_cooldown_rejection() {
        let backend = FakeBackend::text("ok");
        let dir = TempDir::new().unwrap();
        let engine = engine(
            backend.clone(),
            "gpt-3.5-turbo-0125",
            Duration::from_secs(60),
            10,
            &dir,
        );

        assert_eq!(
            engine.respond(&incoming("first"), &NoHistory).await,
            Reply::Text("ok".to_string())
        );
        assert_eq!(
            engine.respond(&incoming("second"), &NoHistory).await,
            Reply::RateLimited
        );
        // The throttled message never reached the backend.
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_quota_rejection() {
        let backend = FakeBackend::text("ok");
        let dir = TempDir::new().unwrap();
        let engine = engine(backend.clone(), "gpt-3.5-turbo-0125", Duration::ZERO, 1, &dir);

        assert_eq!(
            engine.respond(&incoming("first"), &NoHistory).await,
            Reply::Text("ok".to_string())
        );
        assert_eq!(
            engine.respond(&incoming("second"), &NoHistory).await,
            Reply::QuotaExceeded
        );
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_backend_failure_is_failed_not_panic() {
        let backend = FakeBackend::failing();
        let dir = TempDir::new().unwrap();
        let engine = engine(backend, "gpt-3.5-turbo-0125", Duration::ZERO, 10, &dir);

        assert_eq!(engine.respond(&incoming("hi"), &NoHistory).await, Reply::Failed);
    }

    #[tokio::test]
    async fn test_unknown_model_family_is_failed() {
        let backend = FakeBackend::text("ok");
        let dir = TempDir::new().unwrap();
        let engine = engine(backend.clone(), "gpt-5-nano", Duration::ZERO, 10, &dir);

        assert_eq!(engine.respond(&incoming("hi"), &NoHistory).await, Reply::Failed);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_composed_turns_reach_backend() {
        let backend = FakeBackend::text("ok");
        let dir = TempDir::new().unwrap();
        let engine = engine(backend.clone(), "gpt-3.5-turbo-0125", Duration::ZERO, 10, &dir);

        engine.respond(&incoming("<@555> hello"), &NoHistory).await;

        let calls = backend.calls();
        let RecordedCall::Chat { turns, max_tokens, .. } = &calls[0] else {
            panic!("expected a chat call");
        };
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::System);
        assert_eq!(turns[1].role, Role::User);
        assert_eq!(turns[1].content, "hello");
        assert_eq!(*max_tokens, Some(150));
    }
}

// =============================================================================
// DISPATCHER ROUTING
// =============================================================================

mod routing {
    use super::*;

    #[tokio::test]
    async fn test_instruct_family_uses_completion_path() {
        let backend = FakeBackend::text("  raw text, untouched \n");
        let dispatcher = Dispatcher::new(
            backend.clone(),
            "gpt-3.5-turbo-instruct".to_string(),
            options(),
            false,
        );
        let turns = [Turn::system("behave"), Turn::user("question")];

        let result = dispatcher.dispatch(&turns).await.unwrap();

        // First choice's text comes back unmodified.
        assert_eq!(result.as_deref(), Some("  raw text, untouched \n"));
        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        let RecordedCall::Complete { prompt, max_tokens, top_p, temperature, .. } = &calls[0]
        else {
            panic!("expected a completion call");
        };
        assert_eq!(prompt, "behave\n\nquestion");
        assert_eq!(*max_tokens, 150);
        assert_eq!(*top_p, 0.9);
        assert_eq!(*temperature, 0.7);
    }

    #[tokio::test]
    async fn test_chat_family_without_tools() {
        let backend = FakeBackend::text("answer");
        let dispatcher = Dispatcher::new(
            backend.clone(),
            "gpt-3.5-turbo-0125".to_string(),
            options(),
            false,
        );

        let result = dispatcher.dispatch(&[Turn::user("q")]).await.unwrap();

        assert_eq!(result.as_deref(), Some("answer"));
        let calls = backend.calls();
        let RecordedCall::Chat { had_tools, .. } = &calls[0] else {
            panic!("expected a chat call");
        };
        assert!(!had_tools);
    }

    #[tokio::test]
    async fn test_unmatched_model_returns_none() {
        let backend = FakeBackend::text("unused");
        let dispatcher =
            Dispatcher::new(backend.clone(), "davinci-002".to_string(), options(), false);

        let result = dispatcher.dispatch(&[Turn::user("q")]).await.unwrap();

        assert_eq!(result, None);
        assert!(backend.calls().is_empty());
    }
}

// =============================================================================
// TOOL ROUND-TRIP
// =============================================================================

mod tool_round_trip {
    use super::*;

    #[tokio::test]
    async fn test_single_round_trip() {
        let backend = FakeBackend::scripted(vec![
            ChatOutcome {
                content: None,
                tool_calls: vec![tool_call(
                    "call_1",
                    "get_user_activity",
                    r#"{"user_id": "<@42>"}"#,
                )],
            },
            ChatOutcome {
                content: Some("they've been quiet".to_string()),
                tool_calls: Vec::new(),
            },
        ]);
        let dispatcher = Dispatcher::new(
            backend.clone(),
            "gpt-3.5-turbo-0125".to_string(),
            options(),
            true,
        );

        let result = dispatcher.dispatch(&[Turn::user("what's <@42> up to?")]).await.unwrap();

        assert_eq!(result.as_deref(), Some("they've been quiet"));

        let calls = backend.calls();
        assert_eq!(calls.len(), 2);

        let RecordedCall::Chat { had_tools, max_tokens, .. } = &calls[0] else {
            panic!("expected a chat call");
        };
        assert!(had_tools);
        assert_eq!(*max_tokens, Some(150));

        // The follow-up carries the echoed request and the tool result, and
        // offers no further tool use.
        let RecordedCall::Chat { turns, had_tools, max_tokens, .. } = &calls[1] else {
            panic!("expected a chat call");
        };
        assert!(!had_tools);
        assert_eq!(*max_tokens, None);
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].tool_calls.len(), 1);
        assert_eq!(turns[2].role, Role::Tool);
        assert_eq!(turns[2].tool_call_id.as_deref(), Some("call_1"));
        assert!(turns[2].content.contains("<@42>"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_fatal() {
        let backend = FakeBackend::scripted(vec![ChatOutcome {
            content: None,
            tool_calls: vec![tool_call("call_1", "drop_tables", "{}")],
        }]);
        let dispatcher = Dispatcher::new(
            backend.clone(),
            "gpt-3.5-turbo-0125".to_string(),
            options(),
            true,
        );

        let err = dispatcher.dispatch(&[Turn::user("q")]).await.unwrap_err();

        assert!(matches!(err, DispatchError::UnknownTool(name) if name == "drop_tables"));
        // No follow-up request was attempted.
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_tool_arguments_are_fatal() {
        let backend = FakeBackend::scripted(vec![ChatOutcome {
            content: None,
            tool_calls: vec![tool_call("call_1", "get_user_activity", "not json")],
        }]);
        let dispatcher = Dispatcher::new(
            backend.clone(),
            "gpt-3.5-turbo-0125".to_string(),
            options(),
            true,
        );

        let err = dispatcher.dispatch(&[Turn::user("q")]).await.unwrap_err();
        assert!(matches!(err, DispatchError::Tool(_)));
    }
}

// =============================================================================
// SMALL TALK AND IMAGES
// =============================================================================

mod extras {
    use super::*;

    #[tokio::test]
    async fn test_small_talk_is_capped_and_unthrottled() {
        let backend = FakeBackend::text("zinger");
        let dir = TempDir::new().unwrap();
        // Daily limit of zero: small talk must not touch admission.
        let engine = engine(backend.clone(), "gpt-3.5-turbo-0125", Duration::ZERO, 0, &dir);

        let line = engine.small_talk(&incoming("someone said something")).await.unwrap();

        assert_eq!(line, "zinger");
        let calls = backend.calls();
        let RecordedCall::Chat { turns, max_tokens, had_tools, .. } = &calls[0] else {
            panic!("expected a chat call");
        };
        assert_eq!(turns.len(), 2);
        assert_eq!(*max_tokens, Some(100));
        assert!(!had_tools);
    }

    #[tokio::test]
    async fn test_describe_image_defaults_empty_caption() {
        let backend = FakeBackend::text("a cat, obviously");
        let dir = TempDir::new().unwrap();
        let engine = engine(backend.clone(), "gpt-3.5-turbo-0125", Duration::ZERO, 10, &dir);

        let text = engine.describe_image("  ", "https://cdn.example/cat.png").await.unwrap();

        assert_eq!(text, "a cat, obviously");
        let calls = backend.calls();
        let RecordedCall::Vision { model, prompt, image_url } = &calls[0] else {
            panic!("expected a vision call");
        };
        assert_eq!(model, "gpt-4o-mini");
        assert!(!prompt.trim().is_empty());
        assert_eq!(image_url, "https://cdn.example/cat.png");
    }

    #[tokio::test]
    async fn test_describe_image_uses_caption() {
        let backend = FakeBackend::text("roasted");
        let dir = TempDir::new().unwrap();
        let engine = engine(backend.clone(), "gpt-3.5-turbo-0125", Duration::ZERO, 10, &dir);

        engine.describe_image("roast this", "https://cdn.example/dog.png").await.unwrap();

        let calls = backend.calls();
        let RecordedCall::Vision { prompt, .. } = &calls[0] else {
            panic!("expected a vision call");
        };
        assert_eq!(prompt, "roast this");
    }
}
