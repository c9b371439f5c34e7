use gproxy_protocol::gemini::count_tokens::request::CountTokensRequest as GeminiCountTokensRequest;
use gproxy_protocol::gemini::count_tokens::types::Content as GeminiContent;
use gproxy_protocol::gemini::generate_content::request::GenerateContentRequestBody as GeminiGenerateContentRequestBody;
use gproxy_protocol::gemini::generate_content::types::{Tool as GeminiTool, ToolConfig};
use gproxy_protocol::openai::count_tokens::request::{
    InputTokenCountRequest as OpenAIInputTokenCountRequest,
    InputTokenCountRequestBody as OpenAIInputTokenCountRequestBody,
};

use crate::generate_content::gemini2openai_response::request::{
    map_contents_to_input, map_system_instruction, map_tool_choice, map_tools,
};

/// Convert a Gemini count-tokens request into OpenAI's input-tokens request shape.
pub fn transform_request(request: GeminiCountTokensRequest) -> OpenAIInputTokenCountRequest {
    let model = request
        .path
        .model
        .strip_prefix("models/")
        .unwrap_or(&request.path.model)
        .to_string();

    let (contents, system_instruction, tools, tool_config): (
        Vec<GeminiContent>,
        Option<GeminiContent>,
        Option<Vec<GeminiTool>>,
        Option<ToolConfig>,
    ) = if let Some(contents) = request.body.contents {
        (contents, None, None, None)
    } else if let Some(embedded) = request.body.generate_content_request {
        match serde_json::from_value::<GeminiGenerateContentRequestBody>(embedded) {
            Ok(body) => (
                body.contents,
                body.system_instruction,
                body.tools,
                body.tool_config,
            ),
            Err(_) => (Vec::new(), None, None, None),
        }
    } else {
        (Vec::new(), None, None, None)
    };

    let input = map_contents_to_input(&contents);
    let instructions = system_instruction.and_then(map_system_instruction);
    let tools = tools.map(map_tools).filter(|tools| !tools.is_empty());
    let tool_choice = map_tool_choice(tool_config.as_ref());

    OpenAIInputTokenCountRequest {
        body: OpenAIInputTokenCountRequestBody {
            model,
            input,
            previous_response_id: None,
            tools,
            text: None,
            reasoning: None,
            truncation: None,
            instructions,
            conversation: None,
            tool_choice,
            parallel_tool_calls: None,
        },
    }
}
