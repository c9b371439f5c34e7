//! Shared wire-body construction for `/v1/embeddings`, used by every provider
//! that speaks the OpenAI embeddings surface (openai, openai-compatible custom
//! connections). Passthrough only: the upstream envelope is forwarded to the
//! client unmodified by the engine.

use gproxy_provider_core::{EmbeddingsInput, EmbeddingsRequest};
use serde_json::{Value as JsonValue, json};

pub fn wire_body(req: &EmbeddingsRequest) -> Vec<u8> {
    let input = match &req.input {
        EmbeddingsInput::Single(s) => JsonValue::String(s.clone()),
        EmbeddingsInput::Many(items) => {
            JsonValue::Array(items.iter().cloned().map(JsonValue::String).collect())
        }
    };
    let body = json!({
        "model": req.model,
        "input": input,
        "encoding_format": req.encoding_format,
    });
    serde_json::to_vec(&body).unwrap_or_default()
}
