//! HTTP(S) probe
//!
//! Follows redirects manually so the hop limit is exact, supports basic and
//! OAuth2 client-credentials auth (tokens cached per token endpoint and
//! client id until expiry), optional mutual TLS, per-monitor proxies, and
//! an optional keyword assertion on the response body.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::model::MonitorKind;

use super::{Probe, ProbeContext, ProbeResult};

/// Idle connections kept per host across probe invocations.
const POOL_MAX_IDLE_PER_HOST: usize = 4;

/// Safety margin subtracted from OAuth token lifetimes.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum BodyEncoding {
    #[default]
    Json,
    Form,
    Xml,
    Text,
}

impl BodyEncoding {
    fn content_type(&self) -> &'static str {
        match self {
            BodyEncoding::Json => "application/json",
            BodyEncoding::Form => "application/x-www-form-urlencoded",
            BodyEncoding::Xml => "text/xml",
            BodyEncoding::Text => "text/plain",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum AuthMethod {
    #[default]
    None,
    Basic,
    Oauth2Cc,
    Ntlm,
    Mtls,
}

#[derive(Debug, Clone, Deserialize)]
struct HttpConfig {
    url: String,

    #[serde(default = "default_method")]
    method: String,

    #[serde(default)]
    headers: HashMap<String, String>,

    #[serde(default)]
    body: Option<String>,

    #[serde(default)]
    body_encoding: BodyEncoding,

    /// Accepted groups ("2XX".."5XX") and/or explicit codes ("301").
    #[serde(default = "default_accepted_status")]
    accepted_status: Vec<String>,

    /// 0 disables redirect following entirely.
    #[serde(default = "default_max_redirects")]
    max_redirects: u32,

    #[serde(default)]
    auth_method: AuthMethod,

    #[serde(default)]
    basic_auth_user: Option<String>,
    #[serde(default)]
    basic_auth_pass: Option<String>,

    #[serde(default)]
    oauth_token_url: Option<String>,
    #[serde(default)]
    oauth_client_id: Option<String>,
    #[serde(default)]
    oauth_client_secret: Option<String>,
    #[serde(default)]
    oauth_scopes: Option<String>,

    /// PEM material for mutual TLS.
    #[serde(default)]
    tls_cert: Option<String>,
    #[serde(default)]
    tls_key: Option<String>,
    #[serde(default)]
    tls_ca: Option<String>,

    /// Optional body assertion.
    #[serde(default)]
    keyword: Option<String>,
    #[serde(default)]
    invert_keyword: bool,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_accepted_status() -> Vec<String> {
    vec!["2XX".to_string()]
}

fn default_max_redirects() -> u32 {
    10
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

pub struct HttpProbe {
    /// Shared pooled client for monitors without mTLS/proxy requirements.
    client: reqwest::Client,

    /// OAuth2 client-credentials tokens keyed by (token_url, client_id).
    tokens: Mutex<HashMap<(String, String), CachedToken>>,
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpProbe {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .build()
            .unwrap_or_default();
        Self {
            client,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Pick (or build) the client for this invocation. A dedicated client
    /// is only needed when the monitor carries mTLS material or a proxy.
    fn client_for(
        &self,
        config: &HttpConfig,
        ctx: &ProbeContext<'_>,
    ) -> Result<reqwest::Client, String> {
        let needs_custom = config.auth_method == AuthMethod::Mtls || ctx.proxy.is_some();
        if !needs_custom {
            return Ok(self.client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST);

        if config.auth_method == AuthMethod::Mtls {
            let cert = config.tls_cert.as_deref().unwrap_or("");
            let key = config.tls_key.as_deref().unwrap_or("");
            if cert.is_empty() || key.is_empty() {
                return Err("mtls auth requires tls_cert and tls_key".to_string());
            }
            let identity = reqwest::Identity::from_pem(format!("{cert}\n{key}").as_bytes())
                .map_err(|e| format!("invalid client certificate: {e}"))?;
            builder = builder.identity(identity);

            if let Some(ca) = config.tls_ca.as_deref().filter(|ca| !ca.is_empty()) {
                let ca = reqwest::Certificate::from_pem(ca.as_bytes())
                    .map_err(|e| format!("invalid ca certificate: {e}"))?;
                builder = builder.add_root_certificate(ca);
            }
        }

        if let Some(proxy) = ctx.proxy.filter(|p| p.active) {
            let mut proxy_builder = reqwest::Proxy::all(proxy.url())
                .map_err(|e| format!("invalid proxy configuration: {e}"))?;
            if let (Some(user), Some(pass)) = (&proxy.username, &proxy.password) {
                proxy_builder = proxy_builder.basic_auth(user, pass);
            }
            builder = builder.proxy(proxy_builder);
        }

        builder
            .build()
            .map_err(|e| format!("failed to build http client: {e}"))
    }

    /// Fetch (or reuse) an OAuth2 client-credentials token.
    async fn oauth_token(
        &self,
        config: &HttpConfig,
        client: &reqwest::Client,
        deadline: Duration,
    ) -> Result<String, String> {
        let token_url = config
            .oauth_token_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or("oauth2-cc auth requires oauth_token_url")?;
        let client_id = config
            .oauth_client_id
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or("oauth2-cc auth requires oauth_client_id")?;
        let client_secret = config.oauth_client_secret.as_deref().unwrap_or("");

        let cache_key = (token_url.to_string(), client_id.to_string());
        {
            let tokens = self.tokens.lock().expect("token cache poisoned");
            if let Some(cached) = tokens.get(&cache_key) {
                if cached.expires_at > Instant::now() {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];
        if let Some(scopes) = config.oauth_scopes.as_deref().filter(|s| !s.is_empty()) {
            form.push(("scope", scopes));
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            #[serde(default)]
            expires_in: Option<u64>,
        }

        debug!("fetching oauth2 token from {token_url}");
        let response = client
            .post(token_url)
            .timeout(deadline)
            .form(&form)
            .send()
            .await
            .map_err(|e| format!("token request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!(
                "token endpoint returned status {}",
                response.status()
            ));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| format!("invalid token response: {e}"))?;

        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600));
        let expires_at = Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN);
        self.tokens.lock().expect("token cache poisoned").insert(
            cache_key,
            CachedToken {
                access_token: token.access_token.clone(),
                expires_at,
            },
        );

        Ok(token.access_token)
    }

    fn build_request(
        &self,
        client: &reqwest::Client,
        config: &HttpConfig,
        method: reqwest::Method,
        url: &reqwest::Url,
        bearer: Option<&str>,
        include_body: bool,
        deadline: Duration,
    ) -> reqwest::RequestBuilder {
        let mut request = client.request(method, url.clone()).timeout(deadline);

        let mut has_content_type = false;
        for (name, value) in &config.headers {
            if name.eq_ignore_ascii_case("content-type") {
                has_content_type = true;
            }
            request = request.header(name, value);
        }

        if include_body {
            if let Some(body) = config.body.as_ref().filter(|b| !b.is_empty()) {
                if !has_content_type {
                    request = request.header("Content-Type", config.body_encoding.content_type());
                }
                request = request.body(body.clone());
            }
        }

        match &config.auth_method {
            AuthMethod::Basic => {
                request = request.basic_auth(
                    config.basic_auth_user.as_deref().unwrap_or(""),
                    config.basic_auth_pass.as_deref(),
                );
            }
            AuthMethod::Oauth2Cc => {
                if let Some(token) = bearer {
                    request = request.bearer_auth(token);
                }
            }
            _ => {}
        }

        request
    }
}

#[async_trait]
impl Probe for HttpProbe {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Http
    }

    async fn execute(&self, ctx: ProbeContext<'_>) -> ProbeResult {
        let config: HttpConfig = match serde_json::from_str(&ctx.monitor.config) {
            Ok(config) => config,
            Err(e) => return ProbeResult::down(format!("invalid http config: {e}")),
        };

        if config.auth_method == AuthMethod::Ntlm {
            return ProbeResult::down("ntlm authentication is not supported");
        }

        let method = match config.method.to_uppercase().parse::<reqwest::Method>() {
            Ok(method) => method,
            Err(_) => {
                return ProbeResult::down(format!("invalid http method {:?}", config.method));
            }
        };

        let mut url = match reqwest::Url::parse(&config.url) {
            Ok(url) => url,
            Err(e) => return ProbeResult::down(format!("invalid url {:?}: {e}", config.url)),
        };

        let client = match self.client_for(&config, &ctx) {
            Ok(client) => client,
            Err(msg) => return ProbeResult::down(msg),
        };

        let bearer = if config.auth_method == AuthMethod::Oauth2Cc {
            match self.oauth_token(&config, &client, ctx.deadline).await {
                Ok(token) => Some(token),
                Err(msg) => return ProbeResult::down(msg),
            }
        } else {
            None
        };

        let start = Instant::now();
        let mut current_method = method;
        let mut include_body = true;
        let mut hops = 0u32;

        let response = loop {
            let request = self.build_request(
                &client,
                &config,
                current_method.clone(),
                &url,
                bearer.as_deref(),
                include_body,
                ctx.deadline,
            );

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => return ProbeResult::down(format!("request failed: {e}")),
            };

            let status = response.status();
            if config.max_redirects > 0 && status.is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                if let Some(location) = location {
                    if hops >= config.max_redirects {
                        return ProbeResult::down("too many redirects");
                    }
                    hops += 1;
                    url = match url.join(&location) {
                        Ok(next) => next,
                        Err(e) => {
                            return ProbeResult::down(format!(
                                "invalid redirect location {location:?}: {e}"
                            ));
                        }
                    };
                    // 307/308 preserve the method and body, everything else
                    // degrades to a bodyless GET.
                    if status != reqwest::StatusCode::TEMPORARY_REDIRECT
                        && status != reqwest::StatusCode::PERMANENT_REDIRECT
                    {
                        current_method = reqwest::Method::GET;
                        include_body = false;
                    }
                    debug!("following redirect {hops} to {url}");
                    continue;
                }
            }

            break response;
        };

        let status_code = response.status().as_u16();
        let ping_ms = start.elapsed().as_millis() as u32;

        if !status_accepted(status_code, &config.accepted_status) {
            return ProbeResult::down(format!("unexpected status code: {status_code}"));
        }

        if let Some(keyword) = config.keyword.as_deref().filter(|k| !k.is_empty()) {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => return ProbeResult::down(format!("failed to read response body: {e}")),
            };
            let found = body.contains(keyword);
            if found == config.invert_keyword {
                let expectation = if config.invert_keyword {
                    "present"
                } else {
                    "absent"
                };
                return ProbeResult::down(format!(
                    "keyword {keyword:?} unexpectedly {expectation} in response"
                ));
            }
        }

        ProbeResult::up(format!("{status_code} OK"), ping_ms)
    }
}

/// Check a status code against accepted groups ("2XX") or explicit codes.
fn status_accepted(code: u16, accepted: &[String]) -> bool {
    if accepted.is_empty() {
        return (200..300).contains(&code);
    }
    for entry in accepted {
        let entry = entry.trim();
        if let Some(prefix) = entry.strip_suffix("XX").or_else(|| entry.strip_suffix("xx")) {
            match prefix.parse::<u16>() {
                Ok(group) if code / 100 == group => return true,
                Ok(_) => {}
                Err(_) => warn!("ignoring malformed status group {entry:?}"),
            }
        } else {
            match entry.parse::<u16>() {
                Ok(exact) if exact == code => return true,
                Ok(_) => {}
                Err(_) => warn!("ignoring malformed status entry {entry:?}"),
            }
        }
    }
    false
}
