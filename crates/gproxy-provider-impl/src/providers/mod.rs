//! Concrete `UpstreamProvider` implementations, one submodule per upstream.

mod aistudio;
mod antigravity;
mod claude;
mod claudecode;
mod codex;
mod cursor;
mod custom;
mod deepseek;
pub(crate) mod embeddings;
mod geminicli;
mod github;
mod http_client;
mod iflow;
mod kiro;
mod nvidia;
mod oauth_common;
mod openai;
mod project_id_cache;
mod vertex;
mod vertexexpress;

pub use aistudio::AIStudioProvider;
pub use antigravity::AntigravityProvider;
pub use claude::ClaudeProvider;
pub use claudecode::ClaudeCodeProvider;
pub use codex::CodexProvider;
pub use cursor::CursorProvider;
pub use custom::CustomProvider;
pub use deepseek::DeepSeekProvider;
pub use geminicli::GeminiCliProvider;
pub use github::GitHubCopilotProvider;
pub use iflow::IFlowProvider;
pub use kiro::KiroProvider;
pub use nvidia::NvidiaProvider;
pub use openai::OpenAIProvider;
pub use vertex::VertexProvider;
pub use vertexexpress::VertexExpressProvider;
