use gproxy_protocol::gemini::count_tokens::request::{
    CountTokensPath as GeminiCountTokensPath, CountTokensRequest as GeminiCountTokensRequest,
    CountTokensRequestBody as GeminiCountTokensRequestBody,
};
use gproxy_protocol::gemini::count_tokens::types::Content as GeminiContent;
use gproxy_protocol::gemini::generate_content::request::GenerateContentRequestBody as GeminiGenerateContentRequestBody;
use gproxy_protocol::openai::count_tokens::request::InputTokenCountRequest as OpenAIInputTokenCountRequest;
use serde_json::Value as JsonValue;

use crate::generate_content::openai_response2gemini::request::{
    append_input_param, map_tool_choice, map_tools, push_system_text, text_part,
};

/// Convert an OpenAI input-tokens request into Gemini's count-tokens request shape.
pub fn transform_request(request: OpenAIInputTokenCountRequest) -> GeminiCountTokensRequest {
    let model = request.body.model.clone();

    let mut contents: Vec<GeminiContent> = Vec::new();
    let mut system_texts: Vec<String> = Vec::new();

    if let Some(instructions) = request.body.instructions {
        push_system_text(&mut system_texts, instructions);
    }
    if let Some(input) = request.body.input {
        append_input_param(input, &mut contents, &mut system_texts);
    }

    let system_instruction = if system_texts.is_empty() {
        None
    } else {
        Some(GeminiContent {
            parts: vec![text_part(system_texts.join("\n"))],
            role: None,
        })
    };

    let (tools, _image_tool) = request.body.tools.map(map_tools).unwrap_or_default();
    let tools = if tools.is_empty() { None } else { Some(tools) };
    let tool_config = map_tool_choice(request.body.tool_choice);

    let body = if system_instruction.is_some() || tools.is_some() || tool_config.is_some() {
        GeminiCountTokensRequestBody {
            contents: None,
            generate_content_request: Some(
                serde_json::to_value(GeminiGenerateContentRequestBody {
                    contents,
                    model: Some(model.clone()),
                    tools,
                    tool_config,
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
