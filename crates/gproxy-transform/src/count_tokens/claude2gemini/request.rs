use gproxy_protocol::claude::count_tokens::request::CountTokensRequest as ClaudeCountTokensRequest;
use gproxy_protocol::claude::count_tokens::types::Model as ClaudeModel;
use gproxy_protocol::gemini::count_tokens::request::{
    CountTokensPath as GeminiCountTokensPath, CountTokensRequest as GeminiCountTokensRequest,
    CountTokensRequestBody as GeminiCountTokensRequestBody,
};
use gproxy_protocol::gemini::generate_content::request::GenerateContentRequestBody as GeminiGenerateContentRequestBody;
use serde_json::Value as JsonValue;

use crate::generate_content::claude2gemini::request::{
    map_messages_to_contents, map_system_to_content, map_tools,
};

/// Convert a Claude count-tokens request into Gemini's count-tokens request shape.
pub fn transform_request(request: ClaudeCountTokensRequest) -> GeminiCountTokensRequest {
    let model = match &request.body.model {
        ClaudeModel::Custom(value) => value.clone(),
        ClaudeModel::Known(known) => match serde_json::to_value(known) {
            Ok(JsonValue::String(value)) => value,
            _ => "unknown".to_string(),
        },
    };

    let contents = map_messages_to_contents(&request.body.messages);
    let system_instruction = map_system_to_content(request.body.system);
    let tools = map_tools(request.body.tools);

    let body = if system_instruction.is_some() || tools.is_some() {
        GeminiCountTokensRequestBody {
            contents: None,
            generate_content_request: Some(
                serde_json::to_value(GeminiGenerateContentRequestBody {
                    contents,
                    model: Some(model.clone()),
                    tools,
                    tool_config: None,
                    safety_settings: None,
                    system_instruction,
                    generation_config: None,
                    cached_content: None,
                })
                .unwrap_or(JsonValue::Null),
            ),
        }
    } else {
        GeminiCountTokensRequestBody {
            contents: Some(contents),
            generate_content_request: None,
        }
    };

    GeminiCountTokensRequest {
        path: GeminiCountTokensPath { model },
        body,
    }
}
