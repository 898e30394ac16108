use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const BOT_MESSAGE_TOPIC: &str = "/v1.0/im/bot/messages/get";

fn default_connection_mode() -> ConnectionMode {
    ConnectionMode::Stream
}
fn default_stream_endpoint() -> String {
    "https://api.dingtalk.com/v1.0/gateway/connections/open".into()
}
fn default_webhook_host() -> String {
    "127.0.0.1".into()
}
fn default_webhook_port() -> u16 {
    18790
}
fn default_webhook_path() -> String {
    "/dingtalk/callback".into()
}
fn default_enable_sign_verify() -> bool {
    true
}
fn default_backend_transport() -> BackendTransport {
    BackendTransport::Http
}
fn default_backend_url() -> String {
    "http://127.0.0.1:18001/v1/chat/completions".into()
}
fn default_backend_ws_url() -> String {
    "ws://127.0.0.1:18789".into()
}
fn default_model() -> String {
    "qwen".into()
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_sensitive_words() -> Vec<String> {
    ["机密", "内部密码", "财务报表"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_blocked_reply() -> String {
    "⚠️ 您的输入包含敏感词汇，请求已被拦截。".into()
}
fn default_empty_reply() -> String {
    "【系统】AI 返回了空消息，请检查 OpenClaw 控制台。".into()
}
fn default_error_reply_prefix() -> String {
    "❌ AI 助手连接失败: ".into()
}
fn default_data_dir() -> String {
    "./dingbridge.data".into()
}

/// How inbound DingTalk events reach the bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// Outbound long connection to the DingTalk stream gateway.
    Stream,
    /// DingTalk posts bot callbacks to a local HTTP endpoint.
    Webhook,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendTransport {
    Http,
    #[serde(alias = "ws")]
    Websocket,
}

impl BackendTransport {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "http" => Some(BackendTransport::Http),
            "websocket" | "ws" => Some(BackendTransport::Websocket),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendTransport::Http => "http",
            BackendTransport::Websocket => "websocket",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub dingtalk_app_key: String,
    #[serde(default)]
    pub dingtalk_app_secret: String,
    #[serde(default = "default_connection_mode")]
    pub connection_mode: ConnectionMode,
    #[serde(default = "default_stream_endpoint")]
    pub stream_endpoint: String,
    #[serde(default = "default_webhook_host")]
    pub webhook_host: String,
    #[serde(default = "default_webhook_port")]
    pub webhook_port: u16,
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
    #[serde(default = "default_enable_sign_verify")]
    pub enable_sign_verify: bool,
    /// Reply target for messages that carry no session webhook.
    #[serde(default)]
    pub robot_webhook_url: Option<String>,
    #[serde(default = "default_backend_transport")]
    pub backend_transport: BackendTransport,
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    #[serde(default = "default_backend_ws_url")]
    pub backend_ws_url: String,
    #[serde(default)]
    pub backend_token: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Set to `[]` to turn filtering off.
    #[serde(default = "default_sensitive_words")]
    pub sensitive_words: Vec<String>,
    #[serde(default = "default_blocked_reply")]
    pub blocked_reply: String,
    #[serde(default = "default_empty_reply")]
    pub empty_reply: String,
    #[serde(default = "default_error_reply_prefix")]
    pub error_reply_prefix: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn none_if_blank(value: &mut Option<String>) {
    if value.as_deref().map(|v| v.trim().is_empty()).unwrap_or(false) {
        *value = None;
    }
}

fn redact(secret: &str) -> String {
    let secret = secret.trim();
    if secret.is_empty() {
        return "(unset)".into();
    }
    if secret.chars().count() <= 8 {
        return "***".into();
    }
    let head: String = secret.chars().take(4).collect();
    format!("{head}***")
}

impl Config {
    /// Runtime data directory (logs).
    pub fn runtime_data_dir(&self) -> String {
        PathBuf::from(&self.data_dir)
            .join("runtime")
            .to_string_lossy()
            .to_string()
    }

    pub fn resolve_config_path() -> Result<Option<PathBuf>, BridgeError> {
        if let Ok(custom) = std::env::var("DINGBRIDGE_CONFIG") {
            if std::path::Path::new(&custom).exists() {
                return Ok(Some(PathBuf::from(custom)));
            }
            return Err(BridgeError::Config(format!(
                "DINGBRIDGE_CONFIG points to non-existent file: {custom}"
            )));
        }

        for candidate in ["./dingbridge.config.yaml", "./dingbridge.config.yml"] {
            if std::path::Path::new(candidate).exists() {
                return Ok(Some(PathBuf::from(candidate)));
            }
        }
        Ok(None)
    }

    /// Parse YAML without normalization. An empty document yields all defaults.
    pub fn from_yaml_str(content: &str) -> Result<Self, BridgeError> {
        let content = if content.trim().is_empty() {
            "{}"
        } else {
            content
        };
        serde_yaml::from_str(content)
            .map_err(|e| BridgeError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load `.env`, the YAML file (if any), then environment overrides.
    pub fn load() -> Result<Self, BridgeError> {
        let _ = dotenvy::dotenv();

        let mut config = match Self::resolve_config_path()? {
            Some(path) => {
                let path_str = path.to_string_lossy().to_string();
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| BridgeError::Config(format!("Failed to read {path_str}: {e}")))?;
                Self::from_yaml_str(&content).map_err(|e| match e {
                    BridgeError::Config(msg) => BridgeError::Config(format!("{path_str}: {msg}")),
                    other => other,
                })?
            }
            None => Self::from_yaml_str("")?,
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.post_deserialize()?;
        Ok(config)
    }

    /// Apply the environment variable names the bridge has always been deployed with.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), BridgeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DINGTALK_APP_KEY") {
            self.dingtalk_app_key = v;
        }
        if let Some(v) = get("DINGTALK_APP_SECRET") {
            self.dingtalk_app_secret = v;
        }
        if let Some(v) = get("OPENCLAW_URL") {
            self.backend_url = v;
        }
        if let Some(v) = get("OPENCLAW_WS_URL") {
            self.backend_ws_url = v;
        }
        if let Some(v) = get("OPENCLAW_TOKEN") {
            self.backend_token = Some(v);
        }
        if let Some(v) = get("OPENCLAW_MODEL") {
            self.model = v;
        }
        if let Some(v) = get("OPENCLAW_TRANSPORT") {
            self.backend_transport = BackendTransport::parse(&v).ok_or_else(|| {
                BridgeError::Config(format!(
                    "OPENCLAW_TRANSPORT must be 'http' or 'websocket', got '{v}'"
                ))
            })?;
        }
        Ok(())
    }

    /// Apply post-deserialization normalization and validation.
    pub fn post_deserialize(&mut self) -> Result<(), BridgeError> {
        self.dingtalk_app_key = self.dingtalk_app_key.trim().to_string();
        self.dingtalk_app_secret = self.dingtalk_app_secret.trim().to_string();
        self.backend_url = self.backend_url.trim().trim_end_matches('/').to_string();
        self.backend_ws_url = self.backend_ws_url.trim().to_string();
        self.model = self.model.trim().to_string();
        none_if_blank(&mut self.backend_token);
        none_if_blank(&mut self.robot_webhook_url);

        if self.model.is_empty() {
            self.model = default_model();
        }
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = default_request_timeout_secs();
        }
        if self.stream_endpoint.trim().is_empty() {
            self.stream_endpoint = default_stream_endpoint();
        }
        if self.webhook_host.trim().is_empty() {
            self.webhook_host = default_webhook_host();
        }
        let path = self.webhook_path.trim();
        self.webhook_path = if path.is_empty() {
            default_webhook_path()
        } else if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        self.sensitive_words = self
            .sensitive_words
            .iter()
            .map(|w| w.trim())
            .filter(|w| !w.is_empty())
            .map(ToOwned::to_owned)
            .collect();

        if !(self.backend_url.starts_with("http://") || self.backend_url.starts_with("https://"))
        {
            return Err(BridgeError::Config(format!(
                "backend_url must start with http:// or https://, got '{}'",
                self.backend_url
            )));
        }
        if !(self.backend_ws_url.starts_with("ws://") || self.backend_ws_url.starts_with("wss://"))
        {
            return Err(BridgeError::Config(format!(
                "backend_ws_url must start with ws:// or wss://, got '{}'",
                self.backend_ws_url
            )));
        }

        let has_credentials =
            !self.dingtalk_app_key.is_empty() && !self.dingtalk_app_secret.is_empty();
        match self.connection_mode {
            ConnectionMode::Stream if !has_credentials => {
                return Err(BridgeError::Config(
                    "dingtalk_app_key and dingtalk_app_secret are required in stream mode (or set DINGTALK_APP_KEY / DINGTALK_APP_SECRET)".into(),
                ));
            }
            ConnectionMode::Webhook
                if self.enable_sign_verify && self.dingtalk_app_secret.is_empty() =>
            {
                return Err(BridgeError::Config(
                    "dingtalk_app_secret is required when enable_sign_verify=true".into(),
                ));
            }
            _ => {}
        }
        Ok(())
    }

    /// Effective settings with secrets masked, for `dingbridge check`.
    pub fn redacted_summary(&self) -> Vec<(&'static str, String)> {
        let mut rows = vec![
            ("dingtalk_app_key", self.dingtalk_app_key.clone()),
            ("dingtalk_app_secret", redact(&self.dingtalk_app_secret)),
            (
                "connection_mode",
                match self.connection_mode {
                    ConnectionMode::Stream => "stream".into(),
                    ConnectionMode::Webhook => "webhook".into(),
                },
            ),
        ];
        match self.connection_mode {
            ConnectionMode::Stream => rows.push(("stream_endpoint", self.stream_endpoint.clone())),
            ConnectionMode::Webhook => {
                rows.push((
                    "webhook",
                    format!(
                        "{}:{}{}",
                        self.webhook_host, self.webhook_port, self.webhook_path
                    ),
                ));
                rows.push(("enable_sign_verify", self.enable_sign_verify.to_string()));
            }
        }
        rows.push((
            "backend_transport",
            self.backend_transport.as_str().to_string(),
        ));
        rows.push((
            "backend",
            match self.backend_transport {
                BackendTransport::Http => self.backend_url.clone(),
                BackendTransport::Websocket => self.backend_ws_url.clone(),
            },
        ));
        rows.push((
            "backend_token",
            redact(self.backend_token.as_deref().unwrap_or("")),
        ));
        rows.push(("model", self.model.clone()));
        rows.push((
            "request_timeout_secs",
            self.request_timeout_secs.to_string(),
        ));
        rows.push(("sensitive_words", self.sensitive_words.len().to_string()));
        rows
    }
}
