use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use serde::Deserialize;

use gproxy_provider_core::credential::GitHubCopilotCredential;
use gproxy_provider_core::{
    AuthRetryAction, Credential, OAuthCallbackRequest, OAuthCallbackResult, OAuthCredential,
    OAuthStartRequest, ProviderConfig, ProviderError, ProviderResult, Request, UpstreamCtx,
    UpstreamHttpResponse,
};

use crate::providers::http_client::{SharedClientKind, client_for_ctx};
use crate::providers::oauth_common::parse_query_value;

use super::{CLIENT_ID, COPILOT_TOKEN_URL, json_error, json_response};

const OAUTH_STATE_TTL_SECS: u64 = 900;
const DEVICE_CODE_URL: &str = "https://github.com/login/device/code";
const ACCESS_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const DEVICE_SCOPE: &str = "read:user";
const GRANT_TYPE_DEVICE: &str = "urn:ietf:params:oauth:grant-type:device_code";

#[derive(Debug, Clone)]
struct DeviceState {
    device_code: String,
    interval_secs: u64,
    created_at: Instant,
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default)]
    interval: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct CopilotTokenResponse {
    pub(super) token: String,
    #[serde(default)]
    pub(super) expires_at: i64,
}

static DEVICE_STATES: OnceLock<Mutex<HashMap<String, DeviceState>>> = OnceLock::new();

pub(super) fn oauth_start(
    ctx: &UpstreamCtx,
    _config: &ProviderConfig,
    _req: &OAuthStartRequest,
) -> ProviderResult<UpstreamHttpResponse> {
    let authz = crate::providers::oauth_common::block_on(start_device_code(ctx))?;

    let state_id = generate_state_id();
    let mut guard = device_states()
        .lock()
        .map_err(|_| ProviderError::Other("github oauth state lock failed".to_string()))?;
    prune_device_states(&mut guard);
    guard.insert(
        state_id.clone(),
        DeviceState {
            device_code: authz.device_code.clone(),
            interval_secs: authz.interval.unwrap_or(5).max(1),
            created_at: Instant::now(),
        },
    );

    Ok(json_response(serde_json::json!({
        "auth_url": authz.verification_uri,
        "verification_uri": authz.verification_uri,
        "user_code": authz.user_code,
        "interval": authz.interval.unwrap_or(5).max(1),
        "state": state_id,
        "mode": "device_auth",
        "instructions": "Open auth_url, enter user_code, then call /oauth/callback with state.",
    })))
}

pub(super) fn oauth_callback(
    ctx: &UpstreamCtx,
    _config: &ProviderConfig,
    req: &OAuthCallbackRequest,
) -> ProviderResult<OAuthCallbackResult> {
    let Some(state_id) = parse_query_value(req.query.as_deref(), "state") else {
        return Ok(OAuthCallbackResult {
            response: json_error(400, "missing state"),
            credential: None,
        });
    };

    let state = {
        let mut guard = device_states()
            .lock()
            .map_err(|_| ProviderError::Other("github oauth state lock failed".to_string()))?;
        prune_device_states(&mut guard);
        guard.get(&state_id).cloned()
    };
    let Some(state) = state else {
        return Ok(OAuthCallbackResult {
            response: json_error(400, "unknown or expired state"),
            credential: None,
        });
    };

    match crate::providers::oauth_common::block_on(poll_device_token(ctx, &state.device_code)) {
        Ok(PollOutcome::Pending) => {
            let message = format!("authorization_pending: retry after {}s", state.interval_secs);
            Ok(OAuthCallbackResult {
                response: json_error(409, &message),
                credential: None,
            })
        }
        Ok(PollOutcome::Authorized {
            access_token,
            refresh_token,
        }) => {
            {
                let mut guard = device_states()
                    .lock()
                    .map_err(|_| ProviderError::Other("github oauth state lock failed".to_string()))?;
                guard.remove(&state_id);
            }
            let copilot = crate::providers::oauth_common::block_on(fetch_copilot_token(
                ctx,
                &access_token,
            ))
            .ok();
            let credential = Credential::GitHubCopilot(GitHubCopilotCredential {
                github_access_token: access_token.clone(),
                github_refresh_token: refresh_token,
                copilot_token: copilot.as_ref().map(|c| c.token.clone()),
                copilot_token_expires_at: copilot.as_ref().map(|c| c.expires_at).unwrap_or(0),
                known_codex_models: Vec::new(),
            });
            Ok(OAuthCallbackResult {
                response: json_response(serde_json::json!({
                    "access_token": access_token,
                    "copilot_token_acquired": copilot.is_some(),
                })),
                credential: Some(OAuthCredential {
                    name: Some("github:copilot".to_string()),
                    settings_json: None,
                    credential,
                }),
            })
        }
        Err(err) => Ok(OAuthCallbackResult {
            response: json_error(400, &err.to_string()),
            credential: None,
        }),
    }
}

pub(super) fn on_auth_failure<'a>(
    ctx: &'a UpstreamCtx,
    _config: &'a ProviderConfig,
    credential: &'a Credential,
    _req: &'a Request,
    _failure: &'a gproxy_provider_core::provider::UpstreamFailure,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ProviderResult<AuthRetryAction>> + Send + 'a>>
{
    Box::pin(async move {
        let Credential::GitHubCopilot(cred) = credential else {
            return Ok(AuthRetryAction::None);
        };
        let Some(refreshed) = refresh_github_token(ctx, cred).await? else {
            return Ok(AuthRetryAction::None);
        };
        Ok(AuthRetryAction::UpdateCredential(Box::new(
            Credential::GitHubCopilot(refreshed),
        )))
    })
}

/// Refreshes the Copilot token (and cascades a GitHub-token refresh first if needed)
/// whenever it is missing or within 5 minutes of expiry.
pub(super) fn upgrade_credential<'a>(
    ctx: &'a UpstreamCtx,
    _config: &'a ProviderConfig,
    credential: &'a Credential,
    _req: &'a Request,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ProviderResult<Option<Credential>>> + Send + 'a>>
{
    Box::pin(async move {
        let Credential::GitHubCopilot(cred) = credential else {
            return Ok(None);
        };
        if !needs_refresh(cred) {
            return Ok(None);
        }
        let mut updated = cred.clone();
        match fetch_copilot_token(ctx, &updated.github_access_token).await {
            Ok(token) => {
                updated.copilot_token = Some(token.token);
                updated.copilot_token_expires_at = token.expires_at;
                Ok(Some(Credential::GitHubCopilot(updated)))
            }
            Err(_) => {
                let Some(refreshed) = refresh_github_token(ctx, cred).await? else {
                    return Ok(None);
                };
                Ok(Some(Credential::GitHubCopilot(refreshed)))
            }
        }
    })
}

fn needs_refresh(cred: &GitHubCopilotCredential) -> bool {
    if cred.copilot_token.is_none() {
        return true;
    }
    cred.copilot_token_expires_at - now_unix() < 300
}

async fn refresh_github_token(
    ctx: &UpstreamCtx,
    cred: &GitHubCopilotCredential,
) -> ProviderResult<Option<GitHubCopilotCredential>> {
    let Some(refresh_token) = cred.github_refresh_token.clone() else {
        return Ok(None);
    };
    let body = format!(
        "client_id={}&grant_type=refresh_token&refresh_token={}",
        urlencoding::encode(CLIENT_ID),
        urlencoding::encode(&refresh_token),
    );
    let client = client_for_ctx(ctx, SharedClientKind::Global)?;
    let resp = client
        .post(ACCESS_TOKEN_URL)
        .header("Accept", "application/json")
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(body)
        .send()
        .await
        .map_err(|err| ProviderError::Other(err.to_string()))?;
    let bytes = resp
        .bytes()
        .await
        .map_err(|err| ProviderError::Other(err.to_string()))?;
    let data = serde_json::from_slice::<AccessTokenResponse>(&bytes)
        .map_err(|err| ProviderError::Other(err.to_string()))?;
    let Some(access_token) = data.access_token else {
        return Err(ProviderError::Other(format!(
            "github_refresh_failed: {}",
            data.error.unwrap_or_default()
        )));
    };
    let mut updated = cred.clone();
    updated.github_access_token = access_token;
    if let Some(new_refresh) = data.refresh_token {
        updated.github_refresh_token = Some(new_refresh);
    }
    let token = fetch_copilot_token(ctx, &updated.github_access_token).await?;
    updated.copilot_token = Some(token.token);
    updated.copilot_token_expires_at = token.expires_at;
    Ok(Some(updated))
}

pub(super) async fn fetch_copilot_token(
    ctx: &UpstreamCtx,
    github_access_token: &str,
) -> ProviderResult<CopilotTokenResponse> {
    let client = client_for_ctx(ctx, SharedClientKind::Global)?;
    let resp = client
        .get(COPILOT_TOKEN_URL)
        .header("Authorization", format!("token {github_access_token}"))
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|err| ProviderError::Other(err.to_string()))?;
    let status = resp.status();
    let bytes = resp
        .bytes()
        .await
        .map_err(|err| ProviderError::Other(err.to_string()))?;
    if !status.is_success() {
        let text = String::from_utf8_lossy(&bytes);
        return Err(ProviderError::Other(format!(
            "copilot_token_fetch_failed: {status} {text}"
        )));
    }
    serde_json::from_slice::<CopilotTokenResponse>(&bytes)
        .map_err(|err| ProviderError::Other(err.to_string()))
}

enum PollOutcome {
    Pending,
    Authorized {
        access_token: String,
        refresh_token: Option<String>,
    },
}

async fn start_device_code(ctx: &UpstreamCtx) -> ProviderResult<DeviceCodeResponse> {
    let body = format!(
        "client_id={}&scope={}",
        urlencoding::encode(CLIENT_ID),
        urlencoding::encode(DEVICE_SCOPE),
    );
    let client = client_for_ctx(ctx, SharedClientKind::Global)?;
    let resp = client
        .post(DEVICE_CODE_URL)
        .header("Accept", "application/json")
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(body)
        .send()
        .await
        .map_err(|err| ProviderError::Other(err.to_string()))?;
    let status = resp.status();
    let bytes = resp
        .bytes()
        .await
        .map_err(|err| ProviderError::Other(err.to_string()))?;
    if !status.is_success() {
        let text = String::from_utf8_lossy(&bytes);
        return Err(ProviderError::Other(format!(
            "github_device_code_failed: {status} {text}"
        )));
    }
    serde_json::from_slice::<DeviceCodeResponse>(&bytes)
        .map_err(|err| ProviderError::Other(err.to_string()))
}

async fn poll_device_token(ctx: &UpstreamCtx, device_code: &str) -> ProviderResult<PollOutcome> {
    let body = format!(
        "client_id={}&device_code={}&grant_type={}",
        urlencoding::encode(CLIENT_ID),
        urlencoding::encode(device_code),
        urlencoding::encode(GRANT_TYPE_DEVICE),
    );
    let client = client_for_ctx(ctx, SharedClientKind::Global)?;
    let resp = client
        .post(ACCESS_TOKEN_URL)
        .header("Accept", "application/json")
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(body)
        .send()
        .await
        .map_err(|err| ProviderError::Other(err.to_string()))?;
    let bytes = resp
        .bytes()
        .await
        .map_err(|err| ProviderError::Other(err.to_string()))?;
    let data = serde_json::from_slice::<AccessTokenResponse>(&bytes)
        .map_err(|err| ProviderError::Other(err.to_string()))?;
    if let Some(access_token) = data.access_token {
        return Ok(PollOutcome::Authorized {
            access_token,
            refresh_token: data.refresh_token,
        });
    }
    match data.error.as_deref() {
        Some("authorization_pending") | Some("slow_down") => Ok(PollOutcome::Pending),
        other => Err(ProviderError::Other(format!(
            "github_device_token_failed: {}",
            other.unwrap_or("unknown_error")
        ))),
    }
}

fn device_states() -> &'static Mutex<HashMap<String, DeviceState>> {
    DEVICE_STATES.get_or_init(|| Mutex::new(HashMap::new()))
}

fn prune_device_states(states: &mut HashMap<String, DeviceState>) {
    let now = Instant::now();
    states.retain(|_, entry| {
        now.duration_since(entry.created_at) <= Duration::from_secs(OAUTH_STATE_TTL_SECS)
    });
}

fn generate_state_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn now_unix() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_refresh_when_token_missing() {
        let cred = GitHubCopilotCredential {
            github_access_token: "gho_x".to_string(),
            github_refresh_token: None,
            copilot_token: None,
            copilot_token_expires_at: 0,
            known_codex_models: Vec::new(),
        };
        assert!(needs_refresh(&cred));
    }

    #[test]
    fn needs_refresh_when_within_five_minutes_of_expiry() {
        let cred = GitHubCopilotCredential {
            github_access_token: "gho_x".to_string(),
            github_refresh_token: None,
            copilot_token: Some("tok".to_string()),
            copilot_token_expires_at: now_unix() + 100,
            known_codex_models: Vec::new(),
        };
        assert!(needs_refresh(&cred));
    }

    #[test]
    fn does_not_need_refresh_when_comfortably_valid() {
        let cred = GitHubCopilotCredential {
            github_access_token: "gho_x".to_string(),
            github_refresh_token: None,
            copilot_token: Some("tok".to_string()),
            copilot_token_expires_at: now_unix() + 3600,
            known_codex_models: Vec::new(),
        };
        assert!(!needs_refresh(&cred));
    }
}
