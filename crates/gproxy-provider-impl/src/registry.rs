use std::sync::Arc;

use gproxy_provider_core::ProviderRegistry;

use crate::providers::{
    AIStudioProvider, AntigravityProvider, ClaudeCodeProvider, ClaudeProvider, CodexProvider,
    CursorProvider, CustomProvider, DeepSeekProvider, GeminiCliProvider, GitHubCopilotProvider,
    IFlowProvider, KiroProvider, NvidiaProvider, OpenAIProvider, VertexExpressProvider,
    VertexProvider,
};

/// Registers every builtin `UpstreamProvider` implementation.
///
/// Called once at bootstrap; `ProviderRegistry` is otherwise immutable for the
/// lifetime of the process (new upstreams require a binary upgrade, not a config change).
pub fn register_builtin_providers(registry: &mut ProviderRegistry) {
    registry.register(Arc::new(OpenAIProvider::new()));
    registry.register(Arc::new(ClaudeProvider::new()));
    registry.register(Arc::new(AIStudioProvider::new()));
    registry.register(Arc::new(VertexExpressProvider::new()));
    registry.register(Arc::new(VertexProvider::new()));
    registry.register(Arc::new(GeminiCliProvider::new()));
    registry.register(Arc::new(ClaudeCodeProvider::new()));
    registry.register(Arc::new(CodexProvider::new()));
    registry.register(Arc::new(AntigravityProvider::new()));
    registry.register(Arc::new(NvidiaProvider::new()));
    registry.register(Arc::new(DeepSeekProvider::new()));
    registry.register(Arc::new(IFlowProvider::new()));
    registry.register(Arc::new(KiroProvider::new()));
    registry.register(Arc::new(GitHubCopilotProvider::new()));
    registry.register(Arc::new(CursorProvider::new()));
    registry.register(Arc::new(CustomProvider::new()));
}
