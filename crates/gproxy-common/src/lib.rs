use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
}

/// A named, ordered sequence of `alias/model` strings tried in turn. The
/// caller advances to the next entry only on a 5xx from the current one;
/// any other outcome (success or non-5xx failure) is final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combo {
    pub id: String,
    pub name: String,
    pub models: Vec<String>,
}

/// Resolution result of [`resolve_model_string`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedModel {
    /// `providerAlias/model`, already split or resolved through a chain of aliases.
    Single { provider: String, model: String },
    /// A named combo: an ordered list of `providerAlias/model` targets.
    Combo(Vec<(String, String)>),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ModelResolveError {
    #[error("invalid model format")]
    InvalidFormat,
    #[error("alias resolution exceeded maximum depth")]
    AliasDepthExceeded,
}

const MAX_ALIAS_DEPTH: u32 = 8;

/// Resolves an inbound `model` string per the model resolver contract:
/// 1. `provider/model` is returned as-is.
/// 2. Otherwise, a `modelAliases` entry is followed (bounded recursion, since
///    an alias may point to another alias).
/// 3. Otherwise, a `Combo` with a matching name expands to its ordered model list.
/// 4. Otherwise, resolution fails.
pub fn resolve_model_string(
    model_aliases: &HashMap<String, String>,
    combos: &[Combo],
    model_string: &str,
) -> Result<ResolvedModel, ModelResolveError> {
    let mut current = model_string.to_string();
    for _ in 0..MAX_ALIAS_DEPTH {
        if let Some((provider, model)) = current.split_once('/') {
            if !provider.is_empty() && !model.is_empty() {
                return Ok(ResolvedModel::Single {
                    provider: provider.to_string(),
                    model: model.to_string(),
                });
            }
            return Err(ModelResolveError::InvalidFormat);
        }
        if let Some(target) = model_aliases.get(&current) {
            current = target.clone();
            continue;
        }
        if let Some(combo) = combos.iter().find(|c| c.name == current) {
            let mut targets = Vec::with_capacity(combo.models.len());
            for entry in &combo.models {
                let Some((provider, model)) = entry.split_once('/') else {
                    return Err(ModelResolveError::InvalidFormat);
                };
                targets.push((provider.to_string(), model.to_string()));
            }
            return Ok(ResolvedModel::Combo(targets));
        }
        return Err(ModelResolveError::InvalidFormat);
    }
    Err(ModelResolveError::AliasDepthExceeded)
}

/// Fixed, bijective provider alias table (spec §4.C). Short aliases used in
/// `model` fields expand to canonical provider names understood by the registry.
pub fn canonical_provider_name(alias: &str) -> &str {
    match alias {
        "cc" => "claude-code",
        "cx" => "codex",
        "gc" => "gemini-cli",
        "qw" => "qwen-code",
        "if" => "iflow",
        "ag" => "antigravity",
        "gh" => "github",
        "kr" => "kiro",
        "cu" => "cursor",
        other => other,
    }
}

/// Final, merged global configuration used by the running process.
///
/// Merge order (after DB connection): CLI > ENV > DB, then persist back to DB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Stored as a hash (not plaintext).
    pub admin_key_hash: String,
    /// Optional outbound proxy (for upstream egress).
    pub proxy: Option<String>,
    /// Database DSN used for this process.
    pub dsn: String,
    /// Whether to redact sensitive fields in emitted events.
    pub event_redact_sensitive: bool,
    /// `model` string shorthand -> canonical `providerAlias/model` target.
    #[serde(default)]
    pub model_aliases: HashMap<String, String>,
    /// Named, ordered multi-model fallback sequences.
    #[serde(default)]
    pub combos: Vec<Combo>,
}

/// Optional layer used for merging global config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub admin_key_hash: Option<String>,
    pub proxy: Option<String>,
    pub dsn: Option<String>,
    pub event_redact_sensitive: Option<bool>,
    pub model_aliases: Option<HashMap<String, String>>,
    pub combos: Option<Vec<Combo>>,
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.admin_key_hash.is_some() {
            self.admin_key_hash = other.admin_key_hash;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
        if other.dsn.is_some() {
            self.dsn = other.dsn;
        }
        if other.event_redact_sensitive.is_some() {
            self.event_redact_sensitive = other.event_redact_sensitive;
        }
        if other.model_aliases.is_some() {
            self.model_aliases = other.model_aliases;
        }
        if other.combos.is_some() {
            self.combos = other.combos;
        }
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8787),
            admin_key_hash: self
                .admin_key_hash
                .ok_or(GlobalConfigError::MissingField("admin_key_hash"))?,
            proxy: self.proxy,
            dsn: self.dsn.ok_or(GlobalConfigError::MissingField("dsn"))?,
            event_redact_sensitive: self.event_redact_sensitive.unwrap_or(true),
            model_aliases: self.model_aliases.unwrap_or_default(),
            combos: self.combos.unwrap_or_default(),
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            admin_key_hash: Some(value.admin_key_hash),
            proxy: value.proxy,
            dsn: Some(value.dsn),
            event_redact_sensitive: Some(value.event_redact_sensitive),
            model_aliases: Some(value.model_aliases),
            combos: Some(value.combos),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn resolves_explicit_provider_model() {
        let result = resolve_model_string(&HashMap::new(), &[], "openai/gpt-4o").unwrap();
        assert_eq!(
            result,
            ResolvedModel::Single {
                provider: "openai".to_string(),
                model: "gpt-4o".to_string(),
            }
        );
    }

    #[test]
    fn resolves_alias_to_canonical_target() {
        let map = aliases(&[("myhaiku", "cc/claude-haiku-4-5-20251001")]);
        let result = resolve_model_string(&map, &[], "myhaiku").unwrap();
        assert_eq!(
            result,
            ResolvedModel::Single {
                provider: "cc".to_string(),
                model: "claude-haiku-4-5-20251001".to_string(),
            }
        );
    }

    #[test]
    fn follows_chained_aliases_up_to_depth_limit() {
        let map = aliases(&[("a", "b"), ("b", "c"), ("c", "openai/gpt-4o")]);
        let result = resolve_model_string(&map, &[], "a").unwrap();
        assert_eq!(
            result,
            ResolvedModel::Single {
                provider: "openai".to_string(),
                model: "gpt-4o".to_string(),
            }
        );
    }

    #[test]
    fn rejects_alias_cycles_beyond_bounded_depth() {
        let map = aliases(&[("a", "b"), ("b", "a")]);
        let err = resolve_model_string(&map, &[], "a").unwrap_err();
        assert_eq!(err, ModelResolveError::AliasDepthExceeded);
    }

    #[test]
    fn resolves_combo_to_ordered_targets() {
        let combos = vec![Combo {
            id: "combo-1".to_string(),
            name: "daily-driver".to_string(),
            models: vec!["openai/gpt-4o".to_string(), "cc/claude-haiku".to_string()],
        }];
        let result = resolve_model_string(&HashMap::new(), &combos, "daily-driver").unwrap();
        assert_eq!(
            result,
            ResolvedModel::Combo(vec![
                ("openai".to_string(), "gpt-4o".to_string()),
                ("cc".to_string(), "claude-haiku".to_string()),
            ])
        );
    }

    #[test]
    fn unknown_model_string_is_invalid() {
        let err = resolve_model_string(&HashMap::new(), &[], "nope").unwrap_err();
        assert_eq!(err, ModelResolveError::InvalidFormat);
    }

    #[test]
    fn provider_alias_table_is_fixed() {
        assert_eq!(canonical_provider_name("cc"), "claude-code");
        assert_eq!(canonical_provider_name("cx"), "codex");
        assert_eq!(canonical_provider_name("openai"), "openai");
    }
}
