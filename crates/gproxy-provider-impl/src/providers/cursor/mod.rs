use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde_json::Value as JsonValue;

use gproxy_protocol::openai::create_chat_completions::response::{
    ChatCompletionChoice, ChatCompletionObjectType, CreateChatCompletionResponse,
};
use gproxy_protocol::openai::create_chat_completions::types::{
    ChatCompletionFinishReason, ChatCompletionMessageToolCall, ChatCompletionMessageToolCallFunction,
    ChatCompletionResponseMessage, ChatCompletionResponseRole, ChatCompletionTextContent,
    ChatCompletionToolDefinition, ChatCompletionUserContent, ChatCompletionUserContentPart,
};
use gproxy_provider_core::credential::CursorCredential;
use gproxy_provider_core::{
    Credential, DispatchRule, DispatchTable, HttpMethod, Op, Proto, ProviderConfig, ProviderError,
    ProviderResult, Request, UpstreamCtx, UpstreamHttpRequest, UpstreamProvider,
};

use crate::auth_extractor;

mod checksum;
mod protobuf;

use protobuf::{ConnectFrameDecoder, MessageBuilder, MessageReader, WireValue};

const PROVIDER_NAME: &str = "cursor";
const DEFAULT_BASE_URL: &str = "https://api2.cursor.sh";
const CHAT_PATH: &str = "/aiserver.v1.ChatService/StreamUnifiedChatWithTools";
const CLIENT_VERSION: &str = "1.2.3";
const MCP_TOOL_PREFIX: &str = "mcp_";
const TOOL_ID_DELIMITER: &str = "\nmc_";

// Request-level field numbers (frozen).
const F_REQUEST: u32 = 1;
const F_MESSAGES: u32 = 1;
const F_MODEL: u32 = 5;
const F_WEB_TOOL: u32 = 8;
const F_CONVERSATION_ID: u32 = 23;
const F_IS_AGENTIC: u32 = 27;
const F_MCP_TOOLS: u32 = 34;
const F_SHOULD_DISABLE_TOOLS: u32 = 48;

// Message field numbers (frozen).
const F_MSG_CONTENT: u32 = 1;
const F_MSG_ROLE: u32 = 2;
const F_MSG_ID: u32 = 13;
const F_MSG_IS_AGENTIC: u32 = 29;

// Response field numbers (frozen).
const F_RESP_TOOL_CALL: u32 = 1;
const F_RESP_RESPONSE: u32 = 2;
const F_RESP_TEXT: u32 = 1;
const F_RESP_THINKING: u32 = 25;

const ROLE_USER: u64 = 1;
const ROLE_ASSISTANT: u64 = 2;
const ROLE_SYSTEM: u64 = 3;
const ROLE_TOOL: u64 = 4;

const DISPATCH_TABLE: DispatchTable = DispatchTable::new([
    // Claude
    DispatchRule::Transform {
        target: Proto::OpenAIChat,
    },
    DispatchRule::Transform {
        target: Proto::OpenAIChat,
    },
    DispatchRule::Transform {
        target: Proto::OpenAI,
    },
    DispatchRule::Transform {
        target: Proto::OpenAI,
    },
    DispatchRule::Transform {
        target: Proto::OpenAI,
    },
    // Gemini
    DispatchRule::Transform {
        target: Proto::OpenAIChat,
    },
    DispatchRule::Transform {
        target: Proto::OpenAIChat,
    },
    DispatchRule::Transform {
        target: Proto::OpenAI,
    },
    DispatchRule::Transform {
        target: Proto::OpenAI,
    },
    DispatchRule::Transform {
        target: Proto::OpenAI,
    },
    // OpenAI chat completions: the only entrypoint Cursor exposes.
    DispatchRule::Native,
    DispatchRule::Native,
    // OpenAI Responses (downgrade to chat shape)
    DispatchRule::Transform {
        target: Proto::OpenAIChat,
    },
    DispatchRule::Transform {
        target: Proto::OpenAIChat,
    },
    // OpenAI basic ops: no upstream tokenizer/models surface is exposed.
    DispatchRule::Unsupported,
    DispatchRule::Unsupported,
    DispatchRule::Unsupported,
    // OAuth / usage: Cursor credentials are minted out-of-band.
    DispatchRule::Unsupported,
    DispatchRule::Unsupported,
    DispatchRule::Unsupported,
]);

#[derive(Debug, Default)]
pub struct CursorProvider;

impl CursorProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl UpstreamProvider for CursorProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn dispatch_table(&self, _config: &ProviderConfig) -> DispatchTable {
        DISPATCH_TABLE
    }

    async fn build_openai_chat(
        &self,
        _ctx: &UpstreamCtx,
        config: &ProviderConfig,
        credential: &Credential,
        req: &gproxy_protocol::openai::create_chat_completions::request::CreateChatCompletionRequest,
    ) -> ProviderResult<UpstreamHttpRequest> {
        let (base_url, ghost_mode) = cursor_config(config);
        let cred = cursor_credential(credential)?;

        let unix_time_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| ProviderError::Other(err.to_string()))?
            .as_millis() as u64;
        let machine_id = cred
            .checksum_seed
            .as_deref()
            .unwrap_or(cred.machine_id.as_str());
        let checksum = checksum::compute_checksum(machine_id, unix_time_ms);

        let payload = build_request_frame(&req.body);
        let url = format!("{}{}", base_url.trim_end_matches('/'), CHAT_PATH);
        let is_stream = req.body.stream.unwrap_or(false);
        let headers = cursor_headers(&cred.access_token, &cred.machine_id, &checksum, ghost_mode);

        Ok(UpstreamHttpRequest {
            method: HttpMethod::Post,
            url,
            headers,
            body: Some(Bytes::from(payload)),
            is_stream,
        })
    }

    /// Cursor's wire response is always a sequence of Connect frames, even for a
    /// non-stream request. The streaming case is reshaped transparently by the
    /// engine (see `needs_cursor_response_remap`); this hook reshapes the
    /// collected-into-one-blob non-stream case back into chat-completion JSON.
    fn normalize_nonstream_response(
        &self,
        _ctx: &UpstreamCtx,
        _config: &ProviderConfig,
        _credential: &Credential,
        proto: Proto,
        op: Op,
        _req: &Request,
        body: Bytes,
    ) -> ProviderResult<Bytes> {
        if proto != Proto::OpenAIChat || op != Op::GenerateContent {
            return Ok(body);
        }
        let mut decoder = ConnectFrameDecoder::new();
        let frames = decoder.push(&body);
        let mut accum = ResponseAccumulator::default();
        for frame in frames {
            accum.push_frame(&frame)?;
        }

        let response = CreateChatCompletionResponse {
            id: format!("cursor-{}", uuid::Uuid::new_v4()),
            object: ChatCompletionObjectType::ChatCompletion,
            created: unix_seconds(),
            model: accum.model.clone().unwrap_or_default(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatCompletionResponseMessage {
                    role: ChatCompletionResponseRole::Assistant,
                    content: if accum.text.is_empty() {
                        None
                    } else {
                        Some(accum.text.clone())
                    },
                    refusal: None,
                    tool_calls: accum.tool_calls_final(),
                    annotations: None,
                    function_call: None,
                    audio: None,
                },
                finish_reason: if accum.has_tool_calls() {
                    ChatCompletionFinishReason::ToolCalls
                } else {
                    ChatCompletionFinishReason::Stop
                },
                logprobs: None,
            }],
            usage: None,
            service_tier: None,
            system_fingerprint: None,
        };
        serde_json::to_vec(&response)
            .map(Bytes::from)
            .map_err(|err| ProviderError::Other(err.to_string()))
    }
}

fn cursor_config(config: &ProviderConfig) -> (&str, bool) {
    if let ProviderConfig::Cursor(cfg) = config {
        (
            cfg.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL),
            cfg.ghost_mode,
        )
    } else {
        (DEFAULT_BASE_URL, false)
    }
}

fn cursor_credential(credential: &Credential) -> ProviderResult<&CursorCredential> {
    match credential {
        Credential::Cursor(cred) => Ok(cred),
        _ => Err(ProviderError::InvalidConfig(
            "expected Credential::Cursor".to_string(),
        )),
    }
}

fn cursor_headers(
    access_token: &str,
    machine_id: &str,
    checksum: &str,
    ghost_mode: bool,
) -> gproxy_provider_core::Headers {
    let mut headers = Vec::new();
    auth_extractor::set_bearer(&mut headers, access_token);
    gproxy_provider_core::header_set(&mut headers, "content-type", "application/connect+proto");
    gproxy_provider_core::header_set(&mut headers, "connect-protocol-version", "1");
    gproxy_provider_core::header_set(&mut headers, "x-cursor-checksum", checksum);
    gproxy_provider_core::header_set(&mut headers, "x-cursor-client-version", CLIENT_VERSION);
    gproxy_provider_core::header_set(&mut headers, "x-client-key", machine_id);
    gproxy_provider_core::header_set(&mut headers, "x-cursor-timezone", "UTC");
    gproxy_provider_core::header_set(&mut headers, "x-ghost-mode", ghost_mode.to_string());
    gproxy_provider_core::header_set(
        &mut headers,
        "x-request-id",
        uuid::Uuid::new_v4().to_string(),
    );
    headers
}

fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Builds the wire-framed `StreamUnifiedChatRequestWithTools` Connect payload
/// for an OpenAI-chat request.
fn build_request_frame(
    body: &gproxy_protocol::openai::create_chat_completions::request::CreateChatCompletionRequestBody,
) -> Vec<u8> {
    let request_message = build_request_message(body);
    let mut outer = MessageBuilder::new();
    outer.message_field(F_REQUEST, &request_message);
    protobuf::wrap_connect_frame(&outer.finish(), 0)
}

fn build_request_message(
    body: &gproxy_protocol::openai::create_chat_completions::request::CreateChatCompletionRequestBody,
) -> Vec<u8> {
    let has_tools = body.tools.as_ref().is_some_and(|t| !t.is_empty());
    let mut msg = MessageBuilder::new();
    for (index, message) in body.messages.iter().enumerate() {
        let encoded = build_message(index, message);
        msg.message_field(F_MESSAGES, &encoded);
    }
    msg.string_field(F_MODEL, &body.model);
    msg.bool_field(F_WEB_TOOL, false);
    msg.string_field(F_CONVERSATION_ID, &uuid::Uuid::new_v4().to_string());
    msg.bool_field(F_IS_AGENTIC, has_tools);
    if let Some(tools) = &body.tools {
        for tool in tools {
            let encoded = build_mcp_tool(tool);
            msg.message_field(F_MCP_TOOLS, &encoded);
        }
    }
    msg.bool_field(F_SHOULD_DISABLE_TOOLS, !has_tools);
    msg.finish()
}

fn build_message(
    index: usize,
    message: &gproxy_protocol::openai::create_chat_completions::types::ChatCompletionRequestMessage,
) -> Vec<u8> {
    use gproxy_protocol::openai::create_chat_completions::types::ChatCompletionRequestMessage as M;

    let (role, content) = match message {
        M::System(m) => (ROLE_SYSTEM, text_content(&m.content)),
        M::Developer(m) => (ROLE_SYSTEM, text_content(&m.content)),
        M::User(m) => (ROLE_USER, user_content(&m.content)),
        M::Assistant(m) => (
            ROLE_ASSISTANT,
            m.content.as_ref().map(assistant_content).unwrap_or_default(),
        ),
        M::Tool(m) => (ROLE_TOOL, text_content(&m.content)),
        M::Function(m) => (ROLE_TOOL, m.content.clone().unwrap_or_default()),
    };

    let mut msg = MessageBuilder::new();
    msg.string_field(F_MSG_CONTENT, &content);
    msg.varint_field(F_MSG_ROLE, role);
    msg.string_field(F_MSG_ID, &format!("msg_{index}"));
    msg.bool_field(F_MSG_IS_AGENTIC, false);
    msg.finish()
}

fn text_content(content: &ChatCompletionTextContent) -> String {
    match content {
        ChatCompletionTextContent::Text(text) => text.clone(),
        ChatCompletionTextContent::Parts(parts) => parts
            .iter()
            .map(
                |gproxy_protocol::openai::create_chat_completions::types::ChatCompletionTextContentPart::Text { text }| {
                    text.as_str()
                },
            )
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn user_content(content: &ChatCompletionUserContent) -> String {
    match content {
        ChatCompletionUserContent::Text(text) => text.clone(),
        ChatCompletionUserContent::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                ChatCompletionUserContentPart::Text { text } => Some(text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn assistant_content(
    content: &gproxy_protocol::openai::create_chat_completions::types::ChatCompletionAssistantContent,
) -> String {
    use gproxy_protocol::openai::create_chat_completions::types::ChatCompletionAssistantContent as C;
    match content {
        C::Text(text) => text.clone(),
        C::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                gproxy_protocol::openai::create_chat_completions::types::ChatCompletionAssistantContentPart::Text { text } => Some(text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Builds an MCP tool descriptor. Names without the `mcp_` prefix are
/// rewritten to `mcp_custom_{name}` to satisfy Cursor's MCP tool namespace.
fn build_mcp_tool(tool: &ChatCompletionToolDefinition) -> Vec<u8> {
    let (name, description, parameters) = match tool {
        ChatCompletionToolDefinition::Function { function } => (
            function.name.clone(),
            function.description.clone().unwrap_or_default(),
            function
                .parameters
                .as_ref()
                .map(|p| serde_json::to_string(p).unwrap_or_default())
                .unwrap_or_default(),
        ),
        ChatCompletionToolDefinition::Custom { custom } => (
            custom.name.clone(),
            custom.description.clone().unwrap_or_default(),
            String::new(),
        ),
    };
    let name = mcp_tool_name(&name);

    let mut msg = MessageBuilder::new();
    msg.string_field(1, &name);
    msg.string_field(2, &description);
    msg.string_field(3, &parameters);
    msg.finish()
}

fn mcp_tool_name(name: &str) -> String {
    if name.starts_with(MCP_TOOL_PREFIX) {
        name.to_string()
    } else {
        format!("{MCP_TOOL_PREFIX}custom_{name}")
    }
}

/// Splits a Cursor tool-call id on the `\nmc_` delimiter, returning the
/// external (caller-facing) half. IDs without the delimiter pass through.
fn external_tool_call_id(raw: &str) -> String {
    match raw.split_once(TOOL_ID_DELIMITER) {
        Some((external, _internal)) => external.to_string(),
        None => raw.to_string(),
    }
}

#[derive(Debug, Default)]
struct ResponseAccumulator {
    model: Option<String>,
    text: String,
    thinking: String,
    tool_calls: Vec<(String, String, String)>, // (id, name, args_json)
}

impl ResponseAccumulator {
    fn push_frame(&mut self, frame: &protobuf::ConnectFrame) -> ProviderResult<()> {
        let payload = if frame.is_compressed() {
            Bytes::from(
                protobuf::gunzip(&frame.payload)
                    .map_err(|err| ProviderError::Other(format!("gunzip failed: {err}")))?,
            )
        } else {
            frame.payload.clone()
        };

        if let Some(retry_after) = rate_limit_retry_after(&payload) {
            return Err(ProviderError::RateLimited(retry_after));
        }
        if frame.is_end_stream() {
            // End-of-stream trailer frames that are not rate-limit signals
            // carry no chat content for this codec.
            return Ok(());
        }
        self.push_response_message(payload);
        Ok(())
    }

    fn push_response_message(&mut self, payload: Bytes) {
        for (field, value) in MessageReader::new(payload) {
            match (field, value) {
                (F_RESP_TOOL_CALL, WireValue::LengthDelimited(bytes)) => {
                    self.push_tool_call(bytes);
                }
                (F_RESP_RESPONSE, WireValue::LengthDelimited(bytes)) => {
                    self.push_response_text(bytes);
                }
                _ => {}
            }
        }
    }

    fn push_response_text(&mut self, bytes: Bytes) {
        for (field, value) in MessageReader::new(bytes) {
            match (field, value) {
                (F_RESP_TEXT, WireValue::LengthDelimited(text)) => {
                    self.text.push_str(&String::from_utf8_lossy(&text));
                }
                (F_RESP_THINKING, WireValue::LengthDelimited(text)) => {
                    self.thinking.push_str(&String::from_utf8_lossy(&text));
                }
                _ => {}
            }
        }
    }

    fn push_tool_call(&mut self, bytes: Bytes) {
        let mut id = String::new();
        let mut name = String::new();
        let mut args = String::new();
        for (field, value) in MessageReader::new(bytes) {
            match (field, value) {
                (1, WireValue::LengthDelimited(v)) => id = external_tool_call_id(&String::from_utf8_lossy(&v)),
                (2, WireValue::LengthDelimited(v)) => name = String::from_utf8_lossy(&v).to_string(),
                (3, WireValue::LengthDelimited(v)) => args = String::from_utf8_lossy(&v).to_string(),
                _ => {}
            }
        }
        if id.is_empty() {
            id = format!("call_{}", uuid::Uuid::new_v4());
        }
        self.tool_calls.push((id, name, args));
    }

    fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    fn tool_calls_final(&self) -> Option<Vec<ChatCompletionMessageToolCall>> {
        if self.tool_calls.is_empty() {
            return None;
        }
        Some(
            self.tool_calls
                .iter()
                .map(|(id, name, args)| ChatCompletionMessageToolCall::Function {
                    id: id.clone(),
                    function: ChatCompletionMessageToolCallFunction {
                        name: name.clone(),
                        arguments: args.clone(),
                    },
                })
                .collect(),
        )
    }
}

/// Detects Cursor's in-band rate-limit signal: a JSON payload starting with
/// `{"error"` whose `code` is `resource_exhausted`.
fn rate_limit_retry_after(payload: &[u8]) -> Option<u64> {
    if !payload.starts_with(b"{\"error\"") {
        return None;
    }
    let value: JsonValue = serde_json::from_slice(payload).ok()?;
    let code = value
        .get("error")
        .and_then(|e| e.get("code").or_else(|| e.as_str().map(|_| e)))
        .and_then(|c| c.as_str())
        .unwrap_or("");
    if code != "resource_exhausted" {
        return None;
    }
    Some(60)
}

/// Reshapes a raw Connect-RPC byte stream from Cursor into OpenAI chat
/// completion SSE chunks. Spliced in by the engine (see
/// `needs_cursor_response_remap`) ahead of the generic SSE decoder, since
/// Cursor's wire format has no `Proto`/`StreamFormat` of its own.
pub fn map_stream_to_chat_chunks(model: &str, frame: &protobuf::ConnectFrame) -> Vec<StreamChunkEvent> {
    let payload = if frame.is_compressed() {
        match protobuf::gunzip(&frame.payload) {
            Ok(bytes) => Bytes::from(bytes),
            Err(_) => return Vec::new(),
        }
    } else {
        frame.payload.clone()
    };

    if let Some(retry_after) = rate_limit_retry_after(&payload) {
        return vec![StreamChunkEvent::RateLimited(retry_after)];
    }
    if frame.is_end_stream() {
        return vec![StreamChunkEvent::Done];
    }

    let mut out = Vec::new();
    for (field, value) in MessageReader::new(payload) {
        match (field, value) {
            (F_RESP_TOOL_CALL, WireValue::LengthDelimited(bytes)) => {
                if let Some(chunk) = tool_call_chunk(model, bytes) {
                    out.push(StreamChunkEvent::Chunk(chunk));
                }
            }
            (F_RESP_RESPONSE, WireValue::LengthDelimited(bytes)) => {
                if let Some(chunk) = text_chunk(model, bytes) {
                    out.push(StreamChunkEvent::Chunk(chunk));
                }
            }
            _ => {}
        }
    }
    out
}

pub enum StreamChunkEvent {
    Chunk(CreateChatCompletionStreamResponse),
    RateLimited(u64),
    Done,
}

fn text_chunk(model: &str, bytes: Bytes) -> Option<CreateChatCompletionStreamResponse> {
    let mut content = String::new();
    for (field, value) in MessageReader::new(bytes) {
        if let (F_RESP_TEXT, WireValue::LengthDelimited(text)) = (field, value) {
            content.push_str(&String::from_utf8_lossy(&text));
        }
    }
    if content.is_empty() {
        return None;
    }
    Some(stream_response(
        model,
        ChatCompletionStreamResponseDelta {
            content: Some(content),
            reasoning_content: None,
            function_call: None,
            tool_calls: None,
            role: Some(ChatCompletionRole::Assistant),
            refusal: None,
            obfuscation: None,
        },
        None,
    ))
}

fn tool_call_chunk(model: &str, bytes: Bytes) -> Option<CreateChatCompletionStreamResponse> {
    let mut id = String::new();
    let mut name = String::new();
    let mut args = String::new();
    for (field, value) in MessageReader::new(bytes) {
        match (field, value) {
            (1, WireValue::LengthDelimited(v)) => id = external_tool_call_id(&String::from_utf8_lossy(&v)),
            (2, WireValue::LengthDelimited(v)) => name = String::from_utf8_lossy(&v).to_string(),
            (3, WireValue::LengthDelimited(v)) => args = String::from_utf8_lossy(&v).to_string(),
            _ => {}
        }
    }
    if id.is_empty() {
        id = format!("call_{}", uuid::Uuid::new_v4());
    }
    Some(stream_response(
        model,
        ChatCompletionStreamResponseDelta {
            content: None,
            reasoning_content: None,
            function_call: None,
            tool_calls: Some(vec![ChatCompletionMessageToolCallChunk {
                index: 0,
                id: Some(id),
                r#type: Some(ChatCompletionToolCallChunkType::Function),
                function: Some(ChatCompletionMessageToolCallChunkFunction {
                    name: if name.is_empty() { None } else { Some(name) },
                    arguments: if args.is_empty() { None } else { Some(args) },
                }),
            }]),
            role: None,
            refusal: None,
            obfuscation: None,
        },
        None,
    ))
}

fn stream_response(
    model: &str,
    delta: ChatCompletionStreamResponseDelta,
    finish_reason: Option<ChatCompletionFinishReason>,
) -> CreateChatCompletionStreamResponse {
    CreateChatCompletionStreamResponse {
        id: format!("cursor-{}", uuid::Uuid::new_v4()),
        object: ChatCompletionChunkObjectType::ChatCompletionChunk,
        created: unix_seconds(),
        model: model.to_string(),
        choices: vec![ChatCompletionStreamChoice {
            index: 0,
            delta,
            logprobs: None,
            finish_reason,
        }],
        usage: None,
        service_tier: None,
        system_fingerprint: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gproxy_protocol::openai::create_chat_completions::request::CreateChatCompletionRequestBody;
    use gproxy_protocol::openai::create_chat_completions::types::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessage, FunctionObject,
    };

    fn sample_body(tools: Vec<ChatCompletionToolDefinition>) -> CreateChatCompletionRequestBody {
        CreateChatCompletionRequestBody {
            messages: vec![ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessage {
                    content: ChatCompletionUserContent::Text("hello".to_string()),
                    name: None,
                },
            )],
            model: "gpt-cursor-small".to_string(),
            modalities: None,
            verbosity: None,
            reasoning_effort: None,
            max_completion_tokens: None,
            frequency_penalty: None,
            presence_penalty: None,
            web_search_options: None,
            top_logprobs: None,
            response_format: None,
            audio: None,
            store: None,
            stream: Some(true),
            stop: None,
            logit_bias: None,
            logprobs: None,
            max_tokens: None,
            n: None,
            prediction: None,
            seed: None,
            stream_options: None,
            tools: if tools.is_empty() { None } else { Some(tools) },
            tool_choice: None,
            parallel_tool_calls: None,
            function_call: None,
            functions: None,
            metadata: None,
            extra_body: None,
            temperature: None,
            top_p: None,
            user: None,
            safety_identifier: None,
            prompt_cache_key: None,
            service_tier: None,
            prompt_cache_retention: None,
        }
    }

    #[test]
    fn request_frame_has_five_byte_connect_header() {
        let body = sample_body(vec![]);
        let frame = build_request_frame(&body);
        assert_eq!(frame[0], 0);
        let len = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
        assert_eq!(frame.len(), 5 + len);
    }

    #[test]
    fn request_message_round_trips_user_role_and_mcp_tools() {
        let tools = vec![
            ChatCompletionToolDefinition::Function {
                function: FunctionObject {
                    name: "search".to_string(),
                    description: None,
                    parameters: None,
                    strict: None,
                },
            },
            ChatCompletionToolDefinition::Function {
                function: FunctionObject {
                    name: "mcp_fetch".to_string(),
                    description: None,
                    parameters: None,
                    strict: None,
                },
            },
        ];
        let body = sample_body(tools);
        let frame = build_request_frame(&body);
        let mut decoder = ConnectFrameDecoder::new();
        let frames = decoder.push(&frame);
        assert_eq!(frames.len(), 1);

        let mut outer = MessageReader::new(frames[0].payload.clone());
        let (field, WireValue::LengthDelimited(request_bytes)) =
            outer.next().expect("request field present")
        else {
            panic!("expected request field");
        };
        assert_eq!(field, F_REQUEST);

        let mut message_count = 0;
        let mut mcp_tool_count = 0;
        let mut saw_user_role = false;
        for (field, value) in MessageReader::new(request_bytes) {
            match (field, value) {
                (F_MESSAGES, WireValue::LengthDelimited(msg)) => {
                    message_count += 1;
                    for (mf, mv) in MessageReader::new(msg) {
                        if mf == F_MSG_ROLE
                            && let WireValue::Varint(role) = mv
                        {
                            saw_user_role = role == ROLE_USER;
                        }
                    }
                }
                (F_MCP_TOOLS, WireValue::LengthDelimited(_)) => mcp_tool_count += 1,
                _ => {}
            }
        }
        assert_eq!(message_count, 1);
        assert_eq!(mcp_tool_count, 2);
        assert!(saw_user_role);
    }

    #[test]
    fn mcp_tool_name_rewrites_unprefixed_names() {
        assert_eq!(mcp_tool_name("search"), "mcp_custom_search");
        assert_eq!(mcp_tool_name("mcp_search"), "mcp_search");
    }

    #[test]
    fn tool_call_id_splits_on_delimiter() {
        assert_eq!(external_tool_call_id("ext-1\nmc_internal-9"), "ext-1");
        assert_eq!(external_tool_call_id("plain-id"), "plain-id");
    }

    #[test]
    fn detects_resource_exhausted_rate_limit_envelope() {
        let payload = br#"{"error":{"code":"resource_exhausted","message":"slow down"}}"#;
        assert_eq!(rate_limit_retry_after(payload), Some(60));
    }

    #[test]
    fn non_rate_limit_error_is_not_flagged() {
        let payload = br#"{"error":{"code":"invalid_argument"}}"#;
        assert_eq!(rate_limit_retry_after(payload), None);
    }
}
