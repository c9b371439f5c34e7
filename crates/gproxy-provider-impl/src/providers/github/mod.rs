use std::collections::HashSet;

use bytes::Bytes;
use serde_json::Value as JsonValue;

use gproxy_protocol::openai::create_chat_completions::response::CreateChatCompletionResponse;
use gproxy_protocol::openai::create_chat_completions::types::ChatCompletionToolDefinition;
use gproxy_protocol::openai::create_response::response::Response as OpenAIResponse;
use gproxy_provider_core::credential::GitHubCopilotCredential;
use gproxy_provider_core::{
    AuthRetryAction, Credential, DispatchRule, DispatchTable, HttpMethod, OAuthCallbackRequest,
    OAuthCallbackResult, OAuthStartRequest, Op, Proto, ProviderConfig, ProviderError,
    ProviderResult, Request, UpstreamBody, UpstreamCtx, UpstreamHttpRequest, UpstreamHttpResponse,
    UpstreamProvider, header_set,
};
use gproxy_transform::generate_content::openai_chat_completions2openai_response::{
    request::transform_request, response::transform_response,
};

use crate::auth_extractor;

mod oauth;

const PROVIDER_NAME: &str = "github";
const DEFAULT_BASE_URL: &str = "https://api.githubcopilot.com";
const COPILOT_TOKEN_URL: &str = "https://api.github.com/copilot_internal/v2/token";
const DEFAULT_EDITOR_VERSION: &str = "vscode/1.96.0";
// Public OAuth App client id used by open-source Copilot Chat proxies (github/copilot.vim lineage).
const CLIENT_ID: &str = "Iv1.b507a08c87ecfe98";
const NOT_ACCESSIBLE_SIGNAL: &str = "not accessible via the /chat/completions endpoint";
const MAX_TOOLS: usize = 128;
const MAX_TOOL_NAME_LEN: usize = 64;

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
    // OpenAI chat completions: this is the only entrypoint. The provider
    // decides internally whether a given model actually needs /responses.
    DispatchRule::Native,
    DispatchRule::Native,
    // OpenAI Responses (downgrade public /responses callers to chat shape)
    DispatchRule::Transform {
        target: Proto::OpenAIChat,
    },
    DispatchRule::Transform {
        target: Proto::OpenAIChat,
    },
    // OpenAI basic ops
    DispatchRule::Unsupported,
    DispatchRule::Native,
    DispatchRule::Native,
    // OAuth start/callback supported; no upstream usage endpoint.
    DispatchRule::Native,
    DispatchRule::Native,
    DispatchRule::Unsupported,
]);

#[derive(Debug, Default)]
pub struct GitHubCopilotProvider;

impl GitHubCopilotProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl UpstreamProvider for GitHubCopilotProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn dispatch_table(&self, _config: &ProviderConfig) -> DispatchTable {
        DISPATCH_TABLE
    }

    fn oauth_start(
        &self,
        ctx: &UpstreamCtx,
        config: &ProviderConfig,
        req: &OAuthStartRequest,
    ) -> ProviderResult<UpstreamHttpResponse> {
        oauth::oauth_start(ctx, config, req)
    }

    fn oauth_callback(
        &self,
        ctx: &UpstreamCtx,
        config: &ProviderConfig,
        req: &OAuthCallbackRequest,
    ) -> ProviderResult<OAuthCallbackResult> {
        oauth::oauth_callback(ctx, config, req)
    }

    fn on_auth_failure<'a>(
        &'a self,
        ctx: &'a UpstreamCtx,
        config: &'a ProviderConfig,
        credential: &'a Credential,
        req: &'a Request,
        failure: &'a gproxy_provider_core::provider::UpstreamFailure,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = ProviderResult<AuthRetryAction>> + Send + 'a>,
    > {
        oauth::on_auth_failure(ctx, config, credential, req, failure)
    }

    fn upgrade_credential<'a>(
        &'a self,
        ctx: &'a UpstreamCtx,
        config: &'a ProviderConfig,
        credential: &'a Credential,
        req: &'a Request,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = ProviderResult<Option<Credential>>> + Send + 'a>,
    > {
        oauth::upgrade_credential(ctx, config, credential, req)
    }

    /// Detects the "model not accessible via /chat/completions" signal and learns
    /// the model into the credential's `known_codex_models` set so the next attempt
    /// (triggered by this same `UpdateCredential` retry) reissues through `/responses`.
    fn on_upstream_failure<'a>(
        &'a self,
        _ctx: &'a UpstreamCtx,
        _config: &'a ProviderConfig,
        credential: &'a Credential,
        req: &'a Request,
        failure: &'a gproxy_provider_core::provider::UpstreamFailure,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = ProviderResult<AuthRetryAction>> + Send + 'a>,
    > {
        Box::pin(async move {
            let Credential::GitHubCopilot(cred) = credential else {
                return Ok(AuthRetryAction::None);
            };
            let gproxy_provider_core::provider::UpstreamFailure::Http { status, body, .. } =
                failure
            else {
                return Ok(AuthRetryAction::None);
            };
            if *status != 400 || !body_contains(body, NOT_ACCESSIBLE_SIGNAL) {
                return Ok(AuthRetryAction::None);
            }
            let Some(model) = request_model(req) else {
                return Ok(AuthRetryAction::None);
            };
            if cred.known_codex_models.iter().any(|m| m == &model) {
                return Ok(AuthRetryAction::None);
            }
            let mut updated = cred.clone();
            updated.known_codex_models.push(model);
            Ok(AuthRetryAction::UpdateCredential(Box::new(
                Credential::GitHubCopilot(updated),
            )))
        })
    }

    async fn build_openai_chat(
        &self,
        _ctx: &UpstreamCtx,
        config: &ProviderConfig,
        credential: &Credential,
        req: &gproxy_protocol::openai::create_chat_completions::request::CreateChatCompletionRequest,
    ) -> ProviderResult<UpstreamHttpRequest> {
        let (copilot_token, known_codex_models) = github_credential(credential)?;
        let base_url = github_base_url(config);
        let editor_version = github_editor_version(config);

        let mut body = req.body.clone();
        if let Some(tools) = body.tools.take() {
            body.tools = Some(sanitize_tools_for_github(tools));
        }
        let model = body.model.clone();
        let is_stream = body.stream.unwrap_or(false);

        if known_codex_models.iter().any(|m| m == &model) {
            let responses_req = transform_request(
                gproxy_protocol::openai::create_chat_completions::request::CreateChatCompletionRequest {
                    body,
                },
            );
            let url = format!("{}/responses", base_url.trim_end_matches('/'));
            let payload = serde_json::to_vec(&responses_req.body)
                .map_err(|err| ProviderError::Other(err.to_string()))?;
            let headers = copilot_headers(copilot_token, &editor_version);
            return Ok(UpstreamHttpRequest {
                method: HttpMethod::Post,
                url,
                headers,
                body: Some(Bytes::from(payload)),
                is_stream,
            });
        }

        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let payload =
            serde_json::to_vec(&body).map_err(|err| ProviderError::Other(err.to_string()))?;
        let headers = copilot_headers(copilot_token, &editor_version);
        Ok(UpstreamHttpRequest {
            method: HttpMethod::Post,
            url,
            headers,
            body: Some(Bytes::from(payload)),
            is_stream,
        })
    }

    async fn build_openai_models_list(
        &self,
        _ctx: &UpstreamCtx,
        config: &ProviderConfig,
        credential: &Credential,
        _req: &gproxy_protocol::openai::list_models::request::ListModelsRequest,
    ) -> ProviderResult<UpstreamHttpRequest> {
        let (copilot_token, _) = github_credential(credential)?;
        let base_url = github_base_url(config);
        let editor_version = github_editor_version(config);
        let url = format!("{}/models", base_url.trim_end_matches('/'));
        Ok(UpstreamHttpRequest {
            method: HttpMethod::Get,
            url,
            headers: copilot_headers(copilot_token, &editor_version),
            body: None,
            is_stream: false,
        })
    }

    async fn build_openai_models_get(
        &self,
        _ctx: &UpstreamCtx,
        config: &ProviderConfig,
        credential: &Credential,
        req: &gproxy_protocol::openai::get_model::request::GetModelRequest,
    ) -> ProviderResult<UpstreamHttpRequest> {
        let (copilot_token, _) = github_credential(credential)?;
        let base_url = github_base_url(config);
        let editor_version = github_editor_version(config);
        let url = format!(
            "{}/models/{}",
            base_url.trim_end_matches('/'),
            req.path.model
        );
        Ok(UpstreamHttpRequest {
            method: HttpMethod::Get,
            url,
            headers: copilot_headers(copilot_token, &editor_version),
            body: None,
            is_stream: false,
        })
    }

    /// Reshapes a non-stream `/responses`-shaped body back into chat-completion
    /// shape when the request was silently dual-routed. Streaming is reshaped
    /// transparently by the engine (see `needs_github_responses_remap`).
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
        let Ok(value) = serde_json::from_slice::<JsonValue>(&body) else {
            return Ok(body);
        };
        if !is_openai_responses_shape(&value) {
            return Ok(body);
        }
        let Ok(resp) = serde_json::from_value::<OpenAIResponse>(value) else {
            return Ok(body);
        };
        let chat_resp: CreateChatCompletionResponse = transform_response(resp);
        serde_json::to_vec(&chat_resp)
            .map(Bytes::from)
            .map_err(|err| ProviderError::Other(err.to_string()))
    }
}

fn github_credential(credential: &Credential) -> ProviderResult<(&str, &[String])> {
    match credential {
        Credential::GitHubCopilot(GitHubCopilotCredential {
            copilot_token: Some(token),
            known_codex_models,
            ..
        }) => Ok((token.as_str(), known_codex_models.as_slice())),
        Credential::GitHubCopilot(GitHubCopilotCredential { .. }) => Err(ProviderError::Other(
            "github copilot token not available".to_string(),
        )),
        _ => Err(ProviderError::InvalidConfig(
            "expected Credential::GitHubCopilot".to_string(),
        )),
    }
}

fn github_base_url(config: &ProviderConfig) -> &str {
    if let ProviderConfig::GitHubCopilot(cfg) = config
        && let Some(base_url) = cfg.base_url.as_deref()
    {
        return base_url;
    }
    DEFAULT_BASE_URL
}

fn github_editor_version(config: &ProviderConfig) -> String {
    if let ProviderConfig::GitHubCopilot(cfg) = config
        && let Some(version) = cfg.editor_version.as_deref()
    {
        return version.to_string();
    }
    DEFAULT_EDITOR_VERSION.to_string()
}

fn copilot_headers(copilot_token: &str, editor_version: &str) -> gproxy_provider_core::Headers {
    let mut headers = Vec::new();
    auth_extractor::set_bearer(&mut headers, copilot_token);
    auth_extractor::set_accept_json(&mut headers);
    auth_extractor::set_content_type_json(&mut headers);
    header_set(&mut headers, "Editor-Version", editor_version);
    header_set(&mut headers, "Copilot-Integration-Id", "vscode-chat");
    header_set(&mut headers, "Openai-Intent", "conversation-panel");
    headers
}

fn body_contains(body: &Bytes, needle: &str) -> bool {
    String::from_utf8_lossy(body).contains(needle)
}

fn request_model(req: &Request) -> Option<String> {
    match req {
        Request::GenerateContent(gproxy_provider_core::GenerateContentRequest::OpenAIChat(
            inner,
        )) => Some(inner.body.model.clone()),
        _ => None,
    }
}

fn is_openai_responses_shape(value: &JsonValue) -> bool {
    value
        .get("object")
        .and_then(|v| v.as_str())
        .map(|v| v == "response")
        .unwrap_or(false)
        && value.get("output").is_some()
}

/// Caps the tool list at 128 entries, truncates names to 64 chars, drops names
/// that fail `[A-Za-z_][A-Za-z0-9_.:\-]*`, and dedupes by name (first wins).
fn sanitize_tools_for_github(
    tools: Vec<ChatCompletionToolDefinition>,
) -> Vec<ChatCompletionToolDefinition> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for mut tool in tools {
        let name = match &mut tool {
            ChatCompletionToolDefinition::Function { function } => &mut function.name,
            ChatCompletionToolDefinition::Custom { custom } => &mut custom.name,
        };
        if name.len() > MAX_TOOL_NAME_LEN {
            let boundary = name
                .char_indices()
                .map(|(i, _)| i)
                .take_while(|&i| i <= MAX_TOOL_NAME_LEN)
                .last()
                .unwrap_or(0);
            name.truncate(boundary);
        }
        if !is_valid_tool_name(name) {
            continue;
        }
        if !seen.insert(name.clone()) {
            continue;
        }
        out.push(tool);
        if out.len() >= MAX_TOOLS {
            break;
        }
    }
    out
}

fn json_response(body: serde_json::Value) -> UpstreamHttpResponse {
    let mut headers = Vec::new();
    header_set(&mut headers, "content-type", "application/json");
    let bytes = Bytes::from(serde_json::to_vec(&body).unwrap_or_default());
    UpstreamHttpResponse {
        status: 200,
        headers,
        body: UpstreamBody::Bytes(bytes),
    }
}

fn json_error(status: u16, message: &str) -> UpstreamHttpResponse {
    let mut headers = Vec::new();
    header_set(&mut headers, "content-type", "application/json");
    let bytes = Bytes::from(
        serde_json::to_vec(&serde_json::json!({ "error": message })).unwrap_or_default(),
    );
    UpstreamHttpResponse {
        status,
        headers,
        body: UpstreamBody::Bytes(bytes),
    }
}

fn is_valid_tool_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gproxy_protocol::openai::create_chat_completions::types::FunctionObject;

    fn function_tool(name: &str) -> ChatCompletionToolDefinition {
        ChatCompletionToolDefinition::Function {
            function: FunctionObject {
                name: name.to_string(),
                description: None,
                parameters: None,
                strict: None,
            },
        }
    }

    #[test]
    fn sanitize_keeps_short_valid_tool_list_unchanged() {
        let tools = vec![function_tool("search"), function_tool("fetch_url")];
        let sanitized = sanitize_tools_for_github(tools.clone());
        assert_eq!(sanitized.len(), tools.len());
    }

    #[test]
    fn sanitize_caps_at_128_entries() {
        let tools: Vec<_> = (0..200).map(|i| function_tool(&format!("tool_{i}"))).collect();
        let sanitized = sanitize_tools_for_github(tools);
        assert_eq!(sanitized.len(), MAX_TOOLS);
    }

    #[test]
    fn sanitize_truncates_long_names() {
        let long_name = "x".repeat(100);
        let sanitized = sanitize_tools_for_github(vec![function_tool(&long_name)]);
        match &sanitized[0] {
            ChatCompletionToolDefinition::Function { function } => {
                assert_eq!(function.name.len(), MAX_TOOL_NAME_LEN);
            }
            _ => panic!("expected function tool"),
        }
    }

    #[test]
    fn sanitize_truncates_multibyte_name_without_panicking() {
        // 63 ASCII bytes put the 2-byte 'é' straddling byte index 64, the
        // exact split point `MAX_TOOL_NAME_LEN` used to truncate at blindly.
        let long_name = format!("{}{}", "a".repeat(63), "é");
        let sanitized = sanitize_tools_for_github(vec![function_tool(&long_name)]);
        // The non-ASCII char fails the valid-name check regardless, but truncation
        // itself must not panic on the non-char-boundary split.
        assert!(sanitized.is_empty());
    }

    #[test]
    fn sanitize_drops_invalid_names() {
        let sanitized = sanitize_tools_for_github(vec![function_tool("1-starts-with-digit")]);
        assert!(sanitized.is_empty());
    }

    #[test]
    fn sanitize_dedupes_by_name_keeping_first() {
        let sanitized =
            sanitize_tools_for_github(vec![function_tool("search"), function_tool("search")]);
        assert_eq!(sanitized.len(), 1);
    }

    #[test]
    fn sanitize_is_idempotent() {
        let tools = vec![function_tool("search"), function_tool("fetch_url")];
        let once = sanitize_tools_for_github(tools);
        let twice = sanitize_tools_for_github(once.clone());
        assert_eq!(once.len(), twice.len());
    }

    #[test]
    fn responses_shape_is_detected_by_object_and_output() {
        let value = serde_json::json!({
            "object": "response",
            "id": "resp_1",
            "output": [],
        });
        assert!(is_openai_responses_shape(&value));
    }

    #[test]
    fn chat_shape_is_not_detected_as_responses() {
        let value = serde_json::json!({
            "object": "chat.completion",
            "choices": [],
        });
        assert!(!is_openai_responses_shape(&value));
    }
}
