use crate::gemini::generate_content::response::GenerateContentResponse;

/// Each streamed chunk uses the same JSON shape as the non-streaming response.
pub type StreamGenerateContentResponse = GenerateContentResponse;
