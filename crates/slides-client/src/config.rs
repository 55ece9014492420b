use std::time::Duration;

use url::Url;

use crate::error::ClientError;

/// Heartbeat period the realtime service expects from channel clients.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(25);

/// Where the hosted backend lives and the public key used to talk to it.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
    pub heartbeat: Duration,
}

impl BackendConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }

    /// Read `SLIDES_BACKEND_URL` and `SLIDES_BACKEND_ANON_KEY`, honouring a
    /// `.env` file if present.
    pub fn from_env() -> Result<Self, ClientError> {
        let _ = dotenvy::dotenv();

        let url = require_env("SLIDES_BACKEND_URL")?;
        let anon_key = require_env("SLIDES_BACKEND_ANON_KEY")?;
        Ok(Self::new(url, anon_key))
    }

    pub fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.url, path)
    }

    /// WebSocket endpoint of the realtime service.
    pub fn realtime_url(&self) -> Result<Url, ClientError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| ClientError::Config(format!("invalid backend url '{}': {}", self.url, e)))?;

        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(ClientError::Config(format!(
                    "unsupported backend scheme '{}'",
                    other
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::Config(format!("cannot use scheme {}", scheme)))?;
        url.set_path("/realtime/v1/websocket");
        url.query_pairs_mut()
            .clear()
            .append_pair("apikey", &self.anon_key)
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }
}

fn require_env(name: &str) -> Result<String, ClientError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ClientError::Config(format!(
            "missing {} environment variable",
            name
        ))),
    }
}
