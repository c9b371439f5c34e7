use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use serde::Deserialize;

use gproxy_provider_core::credential::KiroCredential;
use gproxy_provider_core::{
    AuthRetryAction, Credential, OAuthCallbackRequest, OAuthCallbackResult, OAuthCredential,
    OAuthStartRequest, ProviderConfig, ProviderError, ProviderResult, Request, UpstreamCtx,
    UpstreamHttpResponse,
};

use crate::providers::http_client::{SharedClientKind, client_for_ctx};
use crate::providers::oauth_common::parse_query_value;

use super::{DEFAULT_REGION, json_error, json_response};

const OAUTH_STATE_TTL_SECS: u64 = 900;
const CLIENT_NAME: &str = "gproxy-kiro";
const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const SCOPE: &str = "codewhisperer:completions";

#[derive(Debug, Clone)]
struct RegisteredClient {
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Clone)]
struct DeviceState {
    device_code: String,
    client_id: String,
    client_secret: String,
    region: String,
    interval_secs: u64,
    created_at: Instant,
}

#[derive(Debug, Deserialize)]
struct RegisterClientResponse {
    #[serde(rename = "clientId")]
    client_id: String,
    #[serde(rename = "clientSecret")]
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct DeviceAuthorizationResponse {
    #[serde(rename = "deviceCode")]
    device_code: String,
    #[serde(rename = "userCode")]
    user_code: String,
    #[serde(rename = "verificationUriComplete")]
    verification_uri_complete: String,
    #[serde(default, rename = "interval")]
    interval: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DeviceTokenResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(default, rename = "refreshToken")]
    refresh_token: Option<String>,
    #[serde(default, rename = "expiresIn")]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct DeviceTokenErrorResponse {
    #[serde(default)]
    error: Option<String>,
}

static DEVICE_STATES: OnceLock<Mutex<HashMap<String, DeviceState>>> = OnceLock::new();
static REGISTERED_CLIENT: OnceLock<Mutex<HashMap<String, RegisteredClient>>> = OnceLock::new();

pub(super) fn oauth_start(
    ctx: &UpstreamCtx,
    config: &ProviderConfig,
    req: &OAuthStartRequest,
) -> ProviderResult<UpstreamHttpResponse> {
    let region = kiro_region(config, req.query.as_deref());
    let client = register_client_cached(ctx, &region)?;
    let authz = start_device_authorization(ctx, &region, &client)?;

    let state_id = generate_state_id();
    let mut guard = device_states()
        .lock()
        .map_err(|_| ProviderError::Other("kiro oauth state lock failed".to_string()))?;
    prune_device_states(&mut guard);
    guard.insert(
        state_id.clone(),
        DeviceState {
            device_code: authz.device_code.clone(),
            client_id: client.client_id.clone(),
            client_secret: client.client_secret.clone(),
            region: region.clone(),
            interval_secs: authz.interval.unwrap_or(5).max(1),
            created_at: Instant::now(),
        },
    );

    Ok(json_response(serde_json::json!({
        "auth_url": authz.verification_uri_complete,
        "verification_uri_complete": authz.verification_uri_complete,
        "user_code": authz.user_code,
        "interval": authz.interval.unwrap_or(5).max(1),
        "state": state_id,
        "mode": "device_auth",
        "instructions": "Open auth_url, approve the device, then call /oauth/callback with state.",
    })))
}

pub(super) fn oauth_callback(
    _ctx: &UpstreamCtx,
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
            .map_err(|_| ProviderError::Other("kiro oauth state lock failed".to_string()))?;
        prune_device_states(&mut guard);
        guard.get(&state_id).cloned()
    };
    let Some(state) = state else {
        return Ok(OAuthCallbackResult {
            response: json_error(400, "unknown or expired state"),
            credential: None,
        });
    };

    match poll_device_token(_ctx, &state) {
        Ok(PollOutcome::Pending) => {
            let message = format!("authorization_pending: retry after {}s", state.interval_secs);
            Ok(OAuthCallbackResult {
                response: json_error(409, &message),
                credential: None,
            })
        }
        Ok(PollOutcome::Authorized(tokens)) => {
            {
                let mut guard = device_states()
                    .lock()
                    .map_err(|_| ProviderError::Other("kiro oauth state lock failed".to_string()))?;
                guard.remove(&state_id);
            }
            let expires_at = tokens
                .expires_in
                .map(|secs| now_unix() + secs)
                .unwrap_or(0);
            let Some(refresh_token) = tokens.refresh_token.clone() else {
                return Ok(OAuthCallbackResult {
                    response: json_error(400, "missing_refresh_token"),
                    credential: None,
                });
            };
            let credential = Credential::Kiro(KiroCredential {
                access_token: tokens.access_token.clone(),
                refresh_token,
                expires_at,
                region: Some(state.region.clone()),
                profile_arn: None,
            });
            Ok(OAuthCallbackResult {
                response: json_response(serde_json::json!({
                    "access_token": tokens.access_token,
                    "expires_at": expires_at,
                    "region": state.region,
                })),
                credential: Some(OAuthCredential {
                    name: Some(format!("kiro:{}", state.region)),
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
        let Credential::Kiro(cred) = credential else {
            return Ok(AuthRetryAction::None);
        };
        let region = cred.region.clone().unwrap_or_else(|| DEFAULT_REGION.to_string());
        let client = register_client_cached(ctx, &region)?;
        let tokens = refresh_access_token(ctx, &region, &client, &cred.refresh_token).await?;
        let mut updated = cred.clone();
        updated.access_token = tokens.access_token;
        if let Some(refresh_token) = tokens.refresh_token {
            updated.refresh_token = refresh_token;
        }
        updated.expires_at = tokens.expires_in.map(|secs| now_unix() + secs).unwrap_or(0);
        Ok(AuthRetryAction::UpdateCredential(Box::new(Credential::Kiro(
            updated,
        ))))
    })
}

enum PollOutcome {
    Pending,
    Authorized(DeviceTokenResponse),
}

fn poll_device_token(ctx: &UpstreamCtx, state: &DeviceState) -> ProviderResult<PollOutcome> {
    crate::providers::oauth_common::block_on(async move {
        let client = client_for_ctx(ctx, SharedClientKind::Global)?;
        let body = serde_json::to_vec(&serde_json::json!({
            "clientId": state.client_id,
            "clientSecret": state.client_secret,
            "deviceCode": state.device_code,
            "grantType": DEVICE_GRANT_TYPE,
        }))
        .map_err(|err| ProviderError::Other(err.to_string()))?;
        let resp = client
            .post(oidc_url(&state.region, "/token"))
            .header("Content-Type", "application/json")
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
            if let Ok(err_body) = serde_json::from_slice::<DeviceTokenErrorResponse>(&bytes) {
                let code = err_body.error.unwrap_or_default();
                if code.contains("AuthorizationPendingException") || code.contains("SlowDown") {
                    return Ok(PollOutcome::Pending);
                }
            }
            let text = String::from_utf8_lossy(&bytes);
            return Err(ProviderError::Other(format!(
                "kiro_device_token_failed: {status} {text}"
            )));
        }
        let data = serde_json::from_slice::<DeviceTokenResponse>(&bytes)
            .map_err(|err| ProviderError::Other(err.to_string()))?;
        Ok(PollOutcome::Authorized(data))
    })
}

async fn refresh_access_token(
    ctx: &UpstreamCtx,
    region: &str,
    client_reg: &RegisteredClient,
    refresh_token: &str,
) -> ProviderResult<DeviceTokenResponse> {
    let client = client_for_ctx(ctx, SharedClientKind::Global)?;
    let body = serde_json::to_vec(&serde_json::json!({
        "clientId": client_reg.client_id,
        "clientSecret": client_reg.client_secret,
        "refreshToken": refresh_token,
        "grantType": "refresh_token",
    }))
    .map_err(|err| ProviderError::Other(err.to_string()))?;
    let resp = client
        .post(oidc_url(region, "/token"))
        .header("Content-Type", "application/json")
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
            "kiro_refresh_failed: {status} {text}"
        )));
    }
    serde_json::from_slice::<DeviceTokenResponse>(&bytes)
        .map_err(|err| ProviderError::Other(err.to_string()))
}

fn register_client_cached(ctx: &UpstreamCtx, region: &str) -> ProviderResult<RegisteredClient> {
    {
        let guard = registered_clients()
            .lock()
            .map_err(|_| ProviderError::Other("kiro client registry lock failed".to_string()))?;
        if let Some(client) = guard.get(region) {
            return Ok(client.clone());
        }
    }
    let registered = crate::providers::oauth_common::block_on(register_client(ctx, region))?;
    let mut guard = registered_clients()
        .lock()
        .map_err(|_| ProviderError::Other("kiro client registry lock failed".to_string()))?;
    guard.insert(region.to_string(), registered.clone());
    Ok(registered)
}

async fn register_client(ctx: &UpstreamCtx, region: &str) -> ProviderResult<RegisteredClient> {
    let client = client_for_ctx(ctx, SharedClientKind::Global)?;
    let body = serde_json::to_vec(&serde_json::json!({
        "clientName": CLIENT_NAME,
        "clientType": "public",
        "scopes": [SCOPE],
    }))
    .map_err(|err| ProviderError::Other(err.to_string()))?;
    let resp = client
        .post(oidc_url(region, "/client/register"))
        .header("Content-Type", "application/json")
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
            "kiro_client_register_failed: {status} {text}"
        )));
    }
    let data = serde_json::from_slice::<RegisterClientResponse>(&bytes)
        .map_err(|err| ProviderError::Other(err.to_string()))?;
    Ok(RegisteredClient {
        client_id: data.client_id,
        client_secret: data.client_secret,
    })
}

fn start_device_authorization(
    ctx: &UpstreamCtx,
    region: &str,
    client_reg: &RegisteredClient,
) -> ProviderResult<DeviceAuthorizationResponse> {
    crate::providers::oauth_common::block_on(async move {
        let client = client_for_ctx(ctx, SharedClientKind::Global)?;
        let body = serde_json::to_vec(&serde_json::json!({
            "clientId": client_reg.client_id,
            "clientSecret": client_reg.client_secret,
            "startUrl": "https://view.awsapps.com/start",
        }))
        .map_err(|err| ProviderError::Other(err.to_string()))?;
        let resp = client
            .post(oidc_url(region, "/device_authorization"))
            .header("Content-Type", "application/json")
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
                "kiro_device_authorization_failed: {status} {text}"
            )));
        }
        serde_json::from_slice::<DeviceAuthorizationResponse>(&bytes)
            .map_err(|err| ProviderError::Other(err.to_string()))
    })
}

fn oidc_url(region: &str, path: &str) -> String {
    format!("https://oidc.{region}.amazonaws.com{path}")
}

fn kiro_region(config: &ProviderConfig, query: Option<&str>) -> String {
    if let Some(region) = parse_query_value(query, "region") {
        return region;
    }
    if let ProviderConfig::Kiro(cfg) = config
        && let Some(region) = cfg.region.as_deref()
    {
        return region.to_string();
    }
    DEFAULT_REGION.to_string()
}

fn device_states() -> &'static Mutex<HashMap<String, DeviceState>> {
    DEVICE_STATES.get_or_init(|| Mutex::new(HashMap::new()))
}

fn registered_clients() -> &'static Mutex<HashMap<String, RegisteredClient>> {
    REGISTERED_CLIENT.get_or_init(|| Mutex::new(HashMap::new()))
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
