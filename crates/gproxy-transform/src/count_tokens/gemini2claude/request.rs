use gproxy_protocol::claude::count_tokens::request::{
    CountTokensHeaders as ClaudeCountTokensHeaders, CountTokensRequest as ClaudeCountTokensRequest,
    CountTokensRequestBody as ClaudeCountTokensRequestBody,
};
use gproxy_protocol::claude::count_tokens::types::Model as ClaudeModel;
use gproxy_protocol::gemini::count_tokens::request::CountTokensRequest as GeminiCountTokensRequest;
use gproxy_protocol::gemini::count_tokens::types::Content as GeminiContent;
use gproxy_protocol::gemini::generate_content::request::GenerateContentRequestBody as GeminiGenerateContentRequestBody;
use gproxy_protocol::gemini::generate_content::types::Tool as GeminiTool;

use crate::generate_content::gemini2claude::request::{
    map_contents_to_messages, map_system_instruction, map_tools,
};

/// Convert a Gemini count-tokens request into a Claude count-tokens request.
pub fn transform_request(request: GeminiCountTokensRequest) -> ClaudeCountTokensRequest {
    let model = request
        .path
        .model
        .strip_prefix("models/")
        .unwrap_or(&request.path.model)
        .to_string();

    let (contents, system_instruction, tools): (Vec<GeminiContent>, Option<GeminiContent>, Option<Vec<GeminiTool>>) =
        if let Some(contents) = request.body.contents {
            (contents, None, None)
        } else if let Some(embedded) = request.body.generate_content_request {
            match serde_json::from_value::<GeminiGenerateContentRequestBody>(embedded) {
                Ok(body) => (body.contents, body.system_instruction, body.tools),
                Err(_) => (Vec::new(), None, None),
            }
        } else {
            (Vec::new(), None, None)
        };

    let messages = map_contents_to_messages(&contents);
    let system = map_system_instruction(system_instruction);
    let tools = tools.map(map_tools);

    ClaudeCountTokensRequest {
        headers: ClaudeCountTokensHeaders::default(),
        body: ClaudeCountTokensRequestBody {
            messages,
            model: ClaudeModel::Custom(model),
            system,
            tools,
            tool_choice: None,
            thinking: None,
            output_config: None,
            output_format: None,
            context_management: None,
            mcp_servers: None,
        },
    }
}
