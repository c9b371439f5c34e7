use bytes::Bytes;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use gproxy_provider_core::{
    Credential, DispatchRule, DispatchTable, HttpMethod, Proto, ProviderConfig, ProviderError,
    ProviderResult, UpstreamCtx, UpstreamHttpRequest, UpstreamProvider,
    credential::ApiKeyCredential,
};

use crate::auth_extractor;

const PROVIDER_NAME: &str = "iflow";
const DEFAULT_BASE_URL: &str = "https://apis.iflow.cn";
const DEFAULT_USER_AGENT: &str = "gproxy-iflow/1.0";

type HmacSha256 = Hmac<Sha256>;

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
    // OpenAI chat completions
    DispatchRule::Native,
    DispatchRule::Native,
    // OpenAI Responses (map to chat completions)
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
    // OAuth / usage (not implemented)
    DispatchRule::Unsupported,
    DispatchRule::Unsupported,
    DispatchRule::Unsupported,
]);

#[derive(Debug, Default)]
pub struct IFlowProvider;

impl IFlowProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl UpstreamProvider for IFlowProvider {
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
        let base_url = iflow_base_url(config)?;
        let api_key = iflow_api_key(credential)?;
        let url = build_url(base_url, "/v1/chat/completions");
        let is_stream = req.body.stream.unwrap_or(false);
        let body =
            serde_json::to_vec(&req.body).map_err(|err| ProviderError::Other(err.to_string()))?;
        let headers = iflow_headers(api_key)?;
        Ok(UpstreamHttpRequest {
            method: HttpMethod::Post,
            url,
            headers,
            body: Some(Bytes::from(body)),
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
        let base_url = iflow_base_url(config)?;
        let api_key = iflow_api_key(credential)?;
        let url = build_url(base_url, "/v1/models");
        let headers = iflow_headers(api_key)?;
        Ok(UpstreamHttpRequest {
            method: HttpMethod::Get,
            url,
            headers,
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
        let base_url = iflow_base_url(config)?;
        let api_key = iflow_api_key(credential)?;
        let url = build_url(base_url, &format!("/v1/models/{}", req.path.model));
        let headers = iflow_headers(api_key)?;
        Ok(UpstreamHttpRequest {
            method: HttpMethod::Get,
            url,
            headers,
            body: None,
            is_stream: false,
        })
    }
}

fn iflow_base_url(config: &ProviderConfig) -> ProviderResult<&str> {
    match config {
        ProviderConfig::IFlow(cfg) => Ok(cfg.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)),
        _ => Err(ProviderError::InvalidConfig(
            "expected ProviderConfig::IFlow".to_string(),
        )),
    }
}

fn iflow_api_key(credential: &Credential) -> ProviderResult<&str> {
    match credential {
        Credential::IFlow(ApiKeyCredential { api_key }) => Ok(api_key.as_str()),
        _ => Err(ProviderError::InvalidConfig(
            "expected Credential::IFlow".to_string(),
        )),
    }
}

/// Builds the `x-iflow-signature` header: HMAC-SHA256 over
/// `{userAgent}:{sessionId}:{timestampMs}`, keyed by the API key, hex-encoded.
fn iflow_headers(api_key: &str) -> ProviderResult<gproxy_provider_core::Headers> {
    let mut headers = Vec::new();
    let session_id = uuid::Uuid::new_v4().to_string();
    let timestamp_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|err| ProviderError::Other(err.to_string()))?
        .as_millis();
    let signature = sign_iflow_request(api_key, DEFAULT_USER_AGENT, &session_id, timestamp_ms)?;

    auth_extractor::set_bearer(&mut headers, api_key);
    auth_extractor::set_accept_json(&mut headers);
    auth_extractor::set_content_type_json(&mut headers);
    auth_extractor::set_user_agent(&mut headers, DEFAULT_USER_AGENT);
    auth_extractor::set_header(&mut headers, "x-iflow-session-id", &session_id);
    auth_extractor::set_header(&mut headers, "x-iflow-timestamp", &timestamp_ms.to_string());
    auth_extractor::set_header(&mut headers, "x-iflow-signature", &signature);
    Ok(headers)
}

fn sign_iflow_request(
    api_key: &str,
    user_agent: &str,
    session_id: &str,
    timestamp_ms: u128,
) -> ProviderResult<String> {
    let message = format!("{user_agent}:{session_id}:{timestamp_ms}");
    let mut mac = HmacSha256::new_from_slice(api_key.as_bytes())
        .map_err(|err| ProviderError::Other(err.to_string()))?;
    mac.update(message.as_bytes());
    let digest = mac.finalize().into_bytes();
    Ok(hex_encode(&digest))
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn build_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_for_same_inputs() {
        let a = sign_iflow_request("secret", "ua/1.0", "sess-1", 1_700_000_000_000).unwrap();
        let b = sign_iflow_request("secret", "ua/1.0", "sess-1", 1_700_000_000_000).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn signature_changes_with_session_id() {
        let a = sign_iflow_request("secret", "ua/1.0", "sess-1", 1_700_000_000_000).unwrap();
        let b = sign_iflow_request("secret", "ua/1.0", "sess-2", 1_700_000_000_000).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn build_url_joins_base_and_path() {
        assert_eq!(
            build_url("https://apis.iflow.cn/", "/v1/models"),
            "https://apis.iflow.cn/v1/models"
        );
    }
}
