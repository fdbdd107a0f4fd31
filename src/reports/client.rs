use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ReportClientError {
    #[error("missing required env var `{0}`")]
    MissingEnvVar(String),
    #[error("invalid appfolio tenant `{0}`")]
    InvalidTenant(String),
    #[error("invalid report name `{0}`")]
    InvalidReportName(String),
    #[error("next page url `{url}` does not match the tenant report endpoint")]
    InvalidNextPageUrl { url: String },
    #[error("appfolio token request failed: {0}")]
    TokenRequest(String),
    #[error("appfolio report request failed: {0}")]
    Request(String),
    #[error("appfolio response decode failed: {0}")]
    Decode(String),
}

/// One page of report output, as returned by the reporting API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPage {
    pub ok: bool,
    pub status: u16,
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub next_page_url: Option<String>,
    #[serde(default)]
    pub rows: Vec<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenProbe {
    pub acquired: bool,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportsProbe {
    pub ok: bool,
    pub endpoint: String,
    #[serde(default)]
    pub count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub ok: bool,
    pub token: TokenProbe,
    pub reports: ReportsProbe,
}

/// Narrow contract the job runner consumes. The production implementation is
/// `AppfolioClient`; tests substitute scripted pages.
pub trait ReportClient {
    fn run_report(
        &self,
        report_name: &str,
        body: &Map<String, Value>,
        method: &str,
        include_rows: bool,
        max_rows: u64,
    ) -> Result<ReportPage, ReportClientError>;

    fn run_report_next_page(
        &self,
        next_page_url: &str,
        include_rows: bool,
        max_rows: u64,
    ) -> Result<ReportPage, ReportClientError>;

    fn probe_access(&self) -> Result<ProbeResult, ReportClientError>;
}

#[derive(Debug, Clone)]
enum AuthMode {
    OAuth {
        token_url: String,
        client_id: String,
        client_secret: String,
        refresh_token: Option<String>,
    },
    Basic {
        user: String,
        password: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppfolioClient {
    tenant: String,
    auth: AuthMode,
    agent: ureq::Agent,
}

#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ReportEnvelope {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    next_page_url: Option<String>,
    #[serde(default, alias = "count")]
    total: Option<u64>,
}

fn require_env(name: &str) -> Result<String, ReportClientError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ReportClientError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn validate_tenant(tenant: &str) -> Result<(), ReportClientError> {
    let valid = !tenant.is_empty()
        && tenant
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-');
    if valid {
        Ok(())
    } else {
        Err(ReportClientError::InvalidTenant(tenant.to_string()))
    }
}

fn validate_report_name(name: &str) -> Result<(), ReportClientError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(ReportClientError::InvalidReportName(name.to_string()))
    }
}

impl AppfolioClient {
    /// Reads `APPFOLIO_TENANT` plus either OAuth credentials
    /// (`APPFOLIO_CLIENT_ID`/`APPFOLIO_CLIENT_SECRET`, optional
    /// `APPFOLIO_REFRESH_TOKEN` and `APPFOLIO_OAUTH_TOKEN_URL`) or per-tenant
    /// HTTP Basic credentials (`APPFOLIO_BASIC_USER`/`APPFOLIO_BASIC_PASSWORD`).
    pub fn from_env() -> Result<Self, ReportClientError> {
        let tenant = require_env("APPFOLIO_TENANT")?;
        validate_tenant(&tenant)?;
        let auth = if let (Some(client_id), Some(client_secret)) = (
            optional_env("APPFOLIO_CLIENT_ID"),
            optional_env("APPFOLIO_CLIENT_SECRET"),
        ) {
            AuthMode::OAuth {
                token_url: optional_env("APPFOLIO_OAUTH_TOKEN_URL")
                    .unwrap_or_else(|| format!("https://{tenant}.appfolio.com/oauth/token")),
                client_id,
                client_secret,
                refresh_token: optional_env("APPFOLIO_REFRESH_TOKEN"),
            }
        } else if let (Some(user), Some(password)) = (
            optional_env("APPFOLIO_BASIC_USER"),
            optional_env("APPFOLIO_BASIC_PASSWORD"),
        ) {
            AuthMode::Basic { user, password }
        } else {
            return Err(ReportClientError::MissingEnvVar(
                "APPFOLIO_CLIENT_ID or APPFOLIO_BASIC_USER".to_string(),
            ));
        };
        Ok(Self {
            tenant,
            auth,
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build(),
        })
    }

    fn endpoint(&self, report_name: &str) -> Result<String, ReportClientError> {
        validate_report_name(report_name)?;
        Ok(format!(
            "https://{}.appfolio.com/api/v2/reports/{}.json",
            self.tenant, report_name
        ))
    }

    fn endpoint_prefix(&self) -> String {
        format!("https://{}.appfolio.com/api/v2/reports/", self.tenant)
    }

    fn basic_header(user: &str, password: &str) -> String {
        use base64::Engine as _;
        let credentials =
            base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
        format!("Basic {credentials}")
    }

    fn token_form(&self, include_credentials: bool) -> Option<String> {
        let AuthMode::OAuth {
            client_id,
            client_secret,
            refresh_token,
            ..
        } = &self.auth
        else {
            return None;
        };
        let mut pairs: Vec<(String, String)> = Vec::new();
        match refresh_token {
            Some(token) => {
                pairs.push(("grant_type".to_string(), "refresh_token".to_string()));
                pairs.push(("refresh_token".to_string(), token.clone()));
            }
            None => pairs.push(("grant_type".to_string(), "client_credentials".to_string())),
        }
        if include_credentials {
            pairs.push(("client_id".to_string(), client_id.clone()));
            pairs.push(("client_secret".to_string(), client_secret.clone()));
        }
        let encoded = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        Some(encoded)
    }

    /// Resolves an authorization header. OAuth grants send credentials in the
    /// form body first and retry once with HTTP Basic client authentication
    /// when the issuer answers `invalid_client`.
    fn authorization(&self) -> Result<(String, String), ReportClientError> {
        match &self.auth {
            AuthMode::Basic { user, password } => {
                Ok((Self::basic_header(user, password), "basic".to_string()))
            }
            AuthMode::OAuth {
                token_url,
                client_id,
                client_secret,
                refresh_token,
            } => {
                let grant_source = if refresh_token.is_some() {
                    "refresh_token"
                } else {
                    "client_credentials_body"
                };
                let form = self
                    .token_form(true)
                    .unwrap_or_default();
                match self.request_token(token_url, &form, None) {
                    Ok(token) => Ok((format!("Bearer {token}"), grant_source.to_string())),
                    Err(err) if err.to_string().contains("invalid_client") => {
                        let form = self.token_form(false).unwrap_or_default();
                        let header = Self::basic_header(client_id, client_secret);
                        let token = self.request_token(token_url, &form, Some(&header))?;
                        Ok((format!("Bearer {token}"), "client_credentials_basic".to_string()))
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    fn request_token(
        &self,
        token_url: &str,
        form: &str,
        basic_header: Option<&str>,
    ) -> Result<String, ReportClientError> {
        let mut request = self
            .agent
            .post(token_url)
            .set("Content-Type", "application/x-www-form-urlencoded");
        if let Some(header) = basic_header {
            request = request.set("Authorization", header);
        }
        let response = request.send_string(form).map_err(|err| match err {
            ureq::Error::Status(status, response) => {
                let body = response.into_string().unwrap_or_default();
                ReportClientError::TokenRequest(format!("status {status}: {body}"))
            }
            other => ReportClientError::TokenRequest(other.to_string()),
        })?;
        let token: TokenResponse = response
            .into_json()
            .map_err(|err| ReportClientError::Decode(err.to_string()))?;
        Ok(token.access_token)
    }

    fn fetch_page(
        &self,
        url: &str,
        method: &str,
        body: Option<&Map<String, Value>>,
        include_rows: bool,
        max_rows: u64,
    ) -> Result<ReportPage, ReportClientError> {
        let (authorization, _) = self.authorization()?;
        let request = match method {
            "GET" => self.agent.get(url),
            _ => self.agent.post(url),
        }
        .set("Authorization", &authorization)
        .set("Accept", "application/json");

        let result = match body {
            Some(body) => request.send_json(Value::Object(body.clone())),
            None => request.call(),
        };
        let (status, envelope) = match result {
            Ok(response) => {
                let status = response.status();
                let envelope: ReportEnvelope = response
                    .into_json()
                    .map_err(|err| ReportClientError::Decode(err.to_string()))?;
                (status, envelope)
            }
            Err(ureq::Error::Status(status, response)) => {
                let text = response.into_string().unwrap_or_default();
                return Ok(ReportPage {
                    ok: false,
                    status,
                    count: None,
                    next_page_url: None,
                    rows: Vec::new(),
                    error: Some(text),
                });
            }
            Err(other) => return Err(ReportClientError::Request(other.to_string())),
        };

        let mut rows = if include_rows { envelope.results } else { Vec::new() };
        if rows.len() as u64 > max_rows {
            rows.truncate(max_rows as usize);
        }
        Ok(ReportPage {
            ok: true,
            status,
            count: envelope.total,
            next_page_url: envelope.next_page_url,
            rows,
            error: None,
        })
    }
}

impl ReportClient for AppfolioClient {
    fn run_report(
        &self,
        report_name: &str,
        body: &Map<String, Value>,
        method: &str,
        include_rows: bool,
        max_rows: u64,
    ) -> Result<ReportPage, ReportClientError> {
        let endpoint = self.endpoint(report_name)?;
        self.fetch_page(&endpoint, method, Some(body), include_rows, max_rows)
    }

    fn run_report_next_page(
        &self,
        next_page_url: &str,
        include_rows: bool,
        max_rows: u64,
    ) -> Result<ReportPage, ReportClientError> {
        // Only follow continuation urls that stay on this tenant's report path.
        if !next_page_url.starts_with(&self.endpoint_prefix()) {
            return Err(ReportClientError::InvalidNextPageUrl {
                url: next_page_url.to_string(),
            });
        }
        self.fetch_page(next_page_url, "GET", None, include_rows, max_rows)
    }

    fn probe_access(&self) -> Result<ProbeResult, ReportClientError> {
        let endpoint = self.endpoint("rent_roll")?;
        let token = match self.authorization() {
            Ok((_, source)) => TokenProbe {
                acquired: true,
                source,
            },
            Err(err) => {
                return Ok(ProbeResult {
                    ok: false,
                    token: TokenProbe {
                        acquired: false,
                        source: err.to_string(),
                    },
                    reports: ReportsProbe {
                        ok: false,
                        endpoint,
                        count: None,
                    },
                })
            }
        };
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut body = Map::new();
        body.insert(
            "as_of_to".to_string(),
            Value::String(super::presets::format_date(now_ms)),
        );
        let page = self.fetch_page(&endpoint, "POST", Some(&body), false, 0)?;
        Ok(ProbeResult {
            ok: page.ok,
            token,
            reports: ReportsProbe {
                ok: page.ok,
                endpoint,
                count: page.count,
            },
        })
    }
}
