//! Response types returned by [`crate::llm::ChatModel`] implementations.
//!
//! These types are intentionally provider-agnostic: a `ChatResponse` carries
//! the assistant's `Message`, optional reasoning content, and usage
//! statistics, regardless of which concrete LLM produced them.

use crate::messages::Message;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Complete response from a non-streaming chat call.
///
/// # Example
///
/// ```rust,ignore
/// let response = model.chat(request).await?;
/// println!("{}", response.message.text().unwrap_or_default());
/// if let Some(usage) = &response.usage {
///     println!("tokens used: {}", usage.total_tokens);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// The assistant's reply message.
    pub message: Message,

    /// Token accounting for the call, when the provider reports it.
    pub usage: Option<UsageMetadata>,

    /// Extracted thinking/reasoning content, present only when the request
    /// used [`crate::llm::ReasoningMode::Separated`] or `Extended` and the
    /// model supports it.
    pub reasoning: Option<ReasoningContent>,

    /// Provider-specific metadata not covered by the fields above (model
    /// id actually served, finish reason, request id, ...).
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ChatResponse {
    /// Build a minimal response carrying only a message.
    pub fn new(message: Message) -> Self {
        Self {
            message,
            usage: None,
            reasoning: None,
            metadata: HashMap::new(),
        }
    }

    /// Attach usage statistics.
    pub fn with_usage(mut self, usage: UsageMetadata) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Attach separated reasoning content.
    pub fn with_reasoning(mut self, reasoning: ReasoningContent) -> Self {
        self.reasoning = Some(reasoning);
        self
    }
}

/// A single incremental piece of a streamed response.
///
/// Implementations emit one chunk per token, per provider-side delta, or
/// per batch — whatever granularity the underlying API gives them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageChunk {
    /// Incremental text content for this chunk, if any.
    pub content: String,

    /// Incremental reasoning/thinking text, present only in
    /// [`crate::llm::ReasoningMode::Separated`]/`Extended` streams.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    /// Set on the final chunk of the stream.
    #[serde(default)]
    pub done: bool,
}

impl MessageChunk {
    /// Build a content-only chunk.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            reasoning: None,
            done: false,
        }
    }

    /// Build the terminal chunk of a stream, optionally carrying trailing text.
    pub fn done(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            reasoning: None,
            done: true,
        }
    }
}

/// A boxed stream of [`MessageChunk`]s, yielding a `Result` per chunk so
/// transport errors mid-stream surface without panicking the consumer.
pub type TokenStream = BoxStream<'static, crate::error::Result<MessageChunk>>;

/// Response from a streaming chat call.
///
/// The caller drains `stream` to assemble the full message; `usage` is
/// populated only after the stream completes (many providers send it as a
/// trailing event), so it starts as `None`.
pub struct ChatStreamResponse {
    /// The chunk stream. Not `Clone` — consume it once.
    pub stream: TokenStream,

    /// Usage statistics, filled in once the stream reports them.
    ///
    /// Wrapped so a caller polling after stream completion can read it
    /// without re-borrowing `self` mutably; implementations update it via
    /// interior mutability or return it out-of-band per their own contract.
    pub usage: Option<UsageMetadata>,
}

impl fmt::Debug for ChatStreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatStreamResponse")
            .field("usage", &self.usage)
            .finish_non_exhaustive()
    }
}

impl ChatStreamResponse {
    /// Wrap a chunk stream with no usage data yet known.
    pub fn new(stream: TokenStream) -> Self {
        Self {
            stream,
            usage: None,
        }
    }
}

/// Extracted reasoning/thinking content for models that support
/// [`crate::llm::ReasoningMode::Separated`] or `Extended`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningContent {
    /// The model's reasoning/thinking text.
    pub content: String,

    /// Tokens spent on reasoning, when the provider reports it separately
    /// from `UsageMetadata::reasoning_tokens`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u32>,
}

impl ReasoningContent {
    /// Build reasoning content from extracted thinking text.
    pub fn new(content: String) -> Self {
        Self {
            content,
            token_count: None,
        }
    }
}

/// Token accounting for a single chat call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetadata {
    /// Tokens consumed by the prompt (messages + system + tool definitions).
    pub input_tokens: u32,

    /// Tokens generated in the response, excluding reasoning tokens.
    pub output_tokens: u32,

    /// Tokens spent on internal reasoning, for thinking models that bill
    /// them separately from output tokens.
    pub reasoning_tokens: Option<u32>,

    /// Total billed tokens for the call.
    pub total_tokens: u32,
}

impl UsageMetadata {
    /// Build usage metadata from input/output counts, computing the total.
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            reasoning_tokens: None,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// Build usage metadata from input/output counts plus a separately
    /// reported reasoning token count, computing the total.
    pub fn with_reasoning(input_tokens: u32, output_tokens: u32, reasoning_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            reasoning_tokens: Some(reasoning_tokens),
            total_tokens: input_tokens + output_tokens + reasoning_tokens,
        }
    }
}
