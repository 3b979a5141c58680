//! Chunk builder for backends whose native stream is not OpenAI-shaped
//!
//! Every chunk of one response shares an id, creation time, alias and
//! provider model; [`ChunkContext`] holds those and stamps out the deltas.

use crate::models::{
    ChatChoice, ChatCompletionChunk, ChatDelta, FinishReason, FunctionCallDelta, MessageRole,
    TokenUsage, ToolCallDelta,
};

/// Parameters common to all chunks in a streaming response
#[derive(Debug, Clone)]
pub struct ChunkContext {
    pub id: String,
    /// Caller-facing alias
    pub model: String,
    pub provider_model: String,
    pub created: i64,
}

impl ChunkContext {
    pub fn new(id: String, model: String, provider_model: String, created: i64) -> Self {
        Self {
            id,
            model,
            provider_model,
            created,
        }
    }

    fn build(
        &self,
        delta: ChatDelta,
        finish_reason: Option<FinishReason>,
        usage: Option<TokenUsage>,
    ) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            provider_model: Some(self.provider_model.clone()),
            system_fingerprint: None,
            choices: vec![ChatChoice {
                index: 0,
                delta: Some(delta),
                finish_reason,
            }],
            usage,
        }
    }

    /// Create a chunk with assistant role (typically first chunk)
    pub fn role_chunk(&self) -> ChatCompletionChunk {
        self.build(
            ChatDelta {
                role: Some(MessageRole::Assistant),
                ..Default::default()
            },
            None,
            None,
        )
    }

    pub fn text_chunk(&self, text: String) -> ChatCompletionChunk {
        self.build(
            ChatDelta {
                content: Some(text),
                ..Default::default()
            },
            None,
            None,
        )
    }

    pub fn reasoning_chunk(&self, text: String) -> ChatCompletionChunk {
        self.build(
            ChatDelta {
                reasoning_content: Some(text),
                ..Default::default()
            },
            None,
            None,
        )
    }

    /// Create a chunk starting a tool call (with id and function name)
    pub fn tool_call_start_chunk(
        &self,
        index: i64,
        tool_call_id: String,
        function_name: String,
    ) -> ChatCompletionChunk {
        self.build(
            ChatDelta {
                tool_calls: Some(vec![ToolCallDelta {
                    index,
                    id: Some(tool_call_id),
                    type_: Some("function".to_string()),
                    function: Some(FunctionCallDelta {
                        name: Some(function_name),
                        arguments: None,
                    }),
                }]),
                ..Default::default()
            },
            None,
            None,
        )
    }

    /// Create a chunk with a fragment of tool call arguments
    pub fn tool_call_args_chunk(&self, index: i64, arguments: String) -> ChatCompletionChunk {
        self.build(
            ChatDelta {
                tool_calls: Some(vec![ToolCallDelta {
                    index,
                    id: None,
                    type_: None,
                    function: Some(FunctionCallDelta {
                        name: None,
                        arguments: Some(arguments),
                    }),
                }]),
                ..Default::default()
            },
            None,
            None,
        )
    }

    /// Final chunk: empty delta with finish reason and usage
    pub fn finish_chunk(
        &self,
        finish_reason: Option<FinishReason>,
        usage: Option<TokenUsage>,
    ) -> ChatCompletionChunk {
        self.build(ChatDelta::default(), finish_reason, usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ChunkContext {
        ChunkContext::new(
            "msg_123".to_string(),
            "claude".to_string(),
            "claude-3-5-sonnet-20241022".to_string(),
            1700000000,
        )
    }

    #[test]
    fn test_role_chunk() {
        let chunk = ctx().role_chunk();
        assert_eq!(chunk.id, "msg_123");
        assert_eq!(chunk.model, "claude");
        assert_eq!(chunk.object, "chat.completion.chunk");
        assert_eq!(
            chunk.choices[0].delta.as_ref().unwrap().role,
            Some(MessageRole::Assistant)
        );
        assert!(chunk.usage.is_none());
    }

    #[test]
    fn test_tool_call_chunks_share_index() {
        let c = ctx();
        let start = c.tool_call_start_chunk(1, "toolu_1".to_string(), "get_weather".to_string());
        let args = c.tool_call_args_chunk(1, "{\"city\":".to_string());

        let start_call = &start.choices[0].delta.as_ref().unwrap().tool_calls.as_ref().unwrap()[0];
        let args_call = &args.choices[0].delta.as_ref().unwrap().tool_calls.as_ref().unwrap()[0];
        assert_eq!(start_call.index, 1);
        assert_eq!(args_call.index, 1);
        assert_eq!(start_call.id.as_deref(), Some("toolu_1"));
        assert!(args_call.id.is_none());
        assert_eq!(
            args_call.function.as_ref().unwrap().arguments.as_deref(),
            Some("{\"city\":")
        );
    }

    #[test]
    fn test_finish_chunk_carries_usage() {
        let chunk = ctx().finish_chunk(Some(FinishReason::ToolCalls), Some(TokenUsage::new(10, 4)));
        assert_eq!(chunk.choices[0].finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(chunk.usage.unwrap().total_tokens, 14);
    }
}
