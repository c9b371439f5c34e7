//! Default provider rows seeded into storage on first boot.
//!
//! Every builtin provider starts disabled with an empty credential pool; an
//! operator enables it (and adds credentials) through the admin surface.

use serde_json::{Value as JsonValue, json};

pub struct BuiltinProviderSeed {
    pub name: &'static str,
    pub config_json: JsonValue,
    pub enabled: bool,
}

fn seed(name: &'static str, kind: &str) -> BuiltinProviderSeed {
    BuiltinProviderSeed {
        name,
        config_json: json!({ "kind": kind, "channel_settings": {} }),
        enabled: false,
    }
}

/// All builtin providers, seeded once at bootstrap time if missing from storage.
pub fn builtin_provider_seeds() -> Vec<BuiltinProviderSeed> {
    vec![
        seed("openai", "openai"),
        seed("claude", "claude"),
        seed("aistudio", "aistudio"),
        seed("vertexexpress", "vertexexpress"),
        seed("vertex", "vertex"),
        seed("geminicli", "geminicli"),
        seed("claudecode", "claudecode"),
        seed("codex", "codex"),
        seed("antigravity", "antigravity"),
        seed("nvidia", "nvidia"),
        seed("deepseek", "deepseek"),
        seed("iflow", "iflow"),
        seed("kiro", "kiro"),
        seed("github", "githubcopilot"),
        seed("cursor", "cursor"),
    ]
}
