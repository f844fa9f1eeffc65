use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::protocol::{ControlKey, leaf_payload, LOGIN_PATH, login_payload, TELEMETRY_PATH};
use crate::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_USERNAME: &str = "admin";

pub struct MygrenClientBuilder {
    host: String,
    username: String,
    password: String,
    verify_ssl: bool,
    timeout: Duration,
}

impl MygrenClientBuilder {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: DEFAULT_USERNAME.to_string(),
            password: String::new(),
            verify_ssl: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Verify the device's TLS certificate chain. Off by default: the
    /// controller ships with a self-signed certificate.
    pub fn verify_ssl(mut self, verify: bool) -> Self {
        self.verify_ssl = verify;
        self
    }

    /// Per-request timeout. Keep it below the polling interval so a
    /// stalled request cannot bleed into the next cycle.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> MygrenClient {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!self.verify_ssl)
            .timeout(self.timeout)
            .build()
            .expect("failed to build HTTP client");

        MygrenClient {
            http,
            base_url: normalize_host(&self.host),
            username: self.username,
            password: self.password,
            session: Mutex::new(None),
        }
    }
}

struct SessionToken {
    value: String,
    obtained_at: DateTime<Utc>,
}

/// HTTP transport for one MaR controller.
///
/// Holds the bearer token obtained from `/api/login` and re-authenticates
/// transparently when the device expires it. Safe to share across tasks;
/// all methods take `&self`.
pub struct MygrenClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    session: Mutex<Option<SessionToken>>,
}

impl MygrenClient {
    pub fn builder(host: impl Into<String>) -> MygrenClientBuilder {
        MygrenClientBuilder::new(host)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Authenticate and store the bearer token for later requests.
    pub async fn login(&self) -> Result<()> {
        let url = format!("{}{}", self.base_url, LOGIN_PATH);
        debug!(url = %url, username = %self.username, "logging in");

        let resp = self
            .http
            .post(&url)
            .json(&login_payload(&self.username, &self.password))
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::InvalidCredentials);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| Error::Malformed(e.to_string()))?;
        let token = match body.get("token") {
            Some(Value::String(token)) => token.clone(),
            Some(_) => {
                return Err(Error::TypeMismatch {
                    field: "token".to_string(),
                    expected: "string",
                });
            }
            None => return Err(Error::MissingField("token")),
        };

        *self.session.lock().expect("session mutex poisoned") = Some(SessionToken {
            value: token,
            obtained_at: Utc::now(),
        });
        trace!("login ok, token stored");
        Ok(())
    }

    /// Send an authenticated request, logging in first if no token is
    /// held. A 401 drops the token, re-authenticates and retries the
    /// request exactly once; a second 401 surfaces as
    /// [`Error::InvalidCredentials`].
    pub async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut retry_auth = true;

        loop {
            let token = match self.current_token() {
                Some(token) => token,
                None => {
                    self.login().await?;
                    match self.current_token() {
                        Some(token) => token,
                        None => return Err(Error::MissingField("token")),
                    }
                }
            };

            trace!(method = %method, url = %url, "sending request");
            let mut req = self.http.request(method.clone(), &url).bearer_auth(&token);
            if let Some(body) = body {
                req = req.json(body);
            }
            let resp = req.send().await?;
            let status = resp.status();

            if status == StatusCode::UNAUTHORIZED {
                if retry_auth {
                    retry_auth = false;
                    debug!(
                        path = %path,
                        obtained_at = ?self.token_obtained_at(),
                        "token rejected, re-authenticating"
                    );
                    self.clear_token();
                    continue;
                }
                return Err(Error::InvalidCredentials);
            }

            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(Error::Rejected {
                    status: status.as_u16(),
                    body,
                });
            }

            let text = resp.text().await?;
            if text.trim().is_empty() {
                return Ok(Value::Object(Map::new()));
            }
            return serde_json::from_str(&text).map_err(|e| Error::Malformed(e.to_string()));
        }
    }

    /// Fetch the full telemetry map.
    pub async fn telemetry(&self) -> Result<Value> {
        self.request(Method::GET, TELEMETRY_PATH, None).await
    }

    /// Write one controllable leaf. The device echoes the accepted value
    /// back through later telemetry rather than in the response body.
    pub async fn put_control(&self, key: ControlKey, value: Value) -> Result<Value> {
        let path = key.endpoint();
        let payload = leaf_payload(path, value);
        debug!(path = %path, payload = %payload, "writing control");
        self.request(Method::PUT, path, Some(&payload)).await
    }

    /// Login plus a first telemetry fetch, for host-side configuration
    /// validation.
    pub async fn test_connection(&self) -> Result<Value> {
        self.login().await?;
        self.telemetry().await
    }

    /// When the held bearer token was obtained, if any.
    pub fn token_obtained_at(&self) -> Option<DateTime<Utc>> {
        self.session
            .lock()
            .expect("session mutex poisoned")
            .as_ref()
            .map(|session| session.obtained_at)
    }

    fn current_token(&self) -> Option<String> {
        self.session
            .lock()
            .expect("session mutex poisoned")
            .as_ref()
            .map(|session| session.value.clone())
    }

    fn clear_token(&self) {
        *self.session.lock().expect("session mutex poisoned") = None;
    }
}

/// Bare hostnames and addresses get an https scheme; trailing slashes
/// are dropped so path joins stay predictable.
fn normalize_host(host: &str) -> String {
    let trimmed = host.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}
