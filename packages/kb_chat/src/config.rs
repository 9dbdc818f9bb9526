use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use stream_session::{MessageTemplates, ReconnectPolicy};

// =============================================================================
// File config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [panes]
//                    max = 6
//
//   env var:         KBCHAT_PANES__MAX=6   (double underscore = nesting)

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub backend: BackendFileConfig,
    #[serde(default)]
    pub panes: PanesFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
    #[serde(default)]
    pub reconnect: ReconnectFileConfig,
    #[serde(default)]
    pub render: RenderFileConfig,
    #[serde(default)]
    pub messages: MessageTemplates,
}

/// Where the answering backend lives (`[backend]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendFileConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Derived from `api_url` when unset.
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for BackendFileConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            ws_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PanesFileConfig {
    #[serde(default = "default_max_panes")]
    pub max: usize,
    #[serde(default = "default_initial_panes")]
    pub initial: usize,
}

impl Default for PanesFileConfig {
    fn default() -> Self {
        Self {
            max: default_max_panes(),
            initial: default_initial_panes(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFileConfig {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub default_model: Option<String>,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            default_model: None,
        }
    }
}

/// Transport retry policy (`[reconnect]`). Off unless enabled.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconnectFileConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for ReconnectFileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RenderFileConfig {
    /// Quiet time after which a pane's partial line, sources and metrics are printed.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for RenderFileConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

fn default_api_url() -> String {
    "http://localhost:5000/api".to_string()
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_max_panes() -> usize {
    stream_session::DEFAULT_MAX_SESSIONS
}
fn default_initial_panes() -> usize {
    1
}
fn default_language() -> String {
    "en".to_string()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_delay_ms() -> u64 {
    1000
}
fn default_flush_interval_ms() -> u64 {
    400
}

/// Build a figment that layers: defaults → config.toml → KBCHAT_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `KBCHAT_BACKEND__API_URL=http://docs:5000/api`  →  `backend.api_url`
///   `KBCHAT_PANES__MAX=6`  →  `panes.max = 6`
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join("config.toml")))
        .merge(Env::prefixed("KBCHAT_").split("__"))
}

/// `http://host/api` → `ws://host/ws`; `https` becomes `wss`.
pub fn derive_ws_url(api_url: &str) -> String {
    let trimmed = api_url.trim_end_matches('/');
    let swapped = match trimmed.strip_prefix("http") {
        Some(rest) => format!("ws{rest}"),
        None => trimmed.to_string(),
    };
    match swapped.strip_suffix("/api") {
        Some(base) => format!("{base}/ws"),
        None => format!("{swapped}/ws"),
    }
}

// =============================================================================
// Runtime config (derived from FileConfig plus CLI flags)
// =============================================================================

/// Flags that take priority over every file/env layer.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub max_panes: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub api_url: String,
    pub ws_url: String,
    pub request_timeout: Duration,
    pub max_panes: usize,
    /// Always within `1..=max_panes`.
    pub initial_panes: usize,
    pub language: String,
    pub default_model: Option<String>,
    pub reconnect: ReconnectPolicy,
    pub flush_interval: Duration,
    pub messages: MessageTemplates,
}

impl ChatConfig {
    pub fn from_file(fc: &FileConfig, overrides: &CliOverrides) -> Self {
        let max_panes = overrides.max_panes.unwrap_or(fc.panes.max).max(1);
        let ws_url = fc
            .backend
            .ws_url
            .clone()
            .unwrap_or_else(|| derive_ws_url(&fc.backend.api_url));
        let reconnect = if fc.reconnect.enabled {
            ReconnectPolicy::Fixed {
                max_attempts: fc.reconnect.max_attempts,
                delay: Duration::from_millis(fc.reconnect.delay_ms),
            }
        } else {
            ReconnectPolicy::Never
        };

        Self {
            api_url: fc.backend.api_url.trim_end_matches('/').to_string(),
            ws_url,
            request_timeout: Duration::from_secs(fc.backend.request_timeout_secs),
            max_panes,
            initial_panes: fc.panes.initial.clamp(1, max_panes),
            language: fc.session.language.clone(),
            default_model: fc.session.default_model.clone().filter(|m| !m.is_empty()),
            reconnect,
            flush_interval: Duration::from_millis(fc.render.flush_interval_ms.max(1)),
            messages: fc.messages.clone(),
        }
    }
}

// =============================================================================
// Directory layout
// =============================================================================

/// `--config-dir` if given, else `~/.kbchat`. The directory need not exist.
pub fn config_dir(custom_dir: Option<PathBuf>) -> Result<PathBuf> {
    match custom_dir {
        Some(dir) => Ok(dir),
        None => Ok(dirs::home_dir()
            .context("Could not find home directory")?
            .join(".kbchat")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(dir: &Path) -> FileConfig {
        load_config(dir).extract().unwrap()
    }

    #[test]
    fn test_file_config_defaults() {
        let fc = FileConfig::default();
        assert_eq!(fc.backend.api_url, "http://localhost:5000/api");
        assert!(fc.backend.ws_url.is_none());
        assert_eq!(fc.backend.request_timeout_secs, 10);
        assert_eq!(fc.panes.max, 4);
        assert_eq!(fc.panes.initial, 1);
        assert_eq!(fc.session.language, "en");
        assert!(!fc.reconnect.enabled);
    }

    #[test]
    fn test_derive_ws_url() {
        assert_eq!(
            derive_ws_url("http://localhost:5000/api"),
            "ws://localhost:5000/ws"
        );
        assert_eq!(
            derive_ws_url("https://docs.example.com/api/"),
            "wss://docs.example.com/ws"
        );
        assert_eq!(derive_ws_url("http://host:8080"), "ws://host:8080/ws");
    }

    #[test]
    fn test_chat_config_from_defaults() {
        let cfg = ChatConfig::from_file(&FileConfig::default(), &CliOverrides::default());
        assert_eq!(cfg.ws_url, "ws://localhost:5000/ws");
        assert_eq!(cfg.max_panes, 4);
        assert_eq!(cfg.initial_panes, 1);
        assert_eq!(cfg.reconnect, ReconnectPolicy::Never);
        assert_eq!(cfg.request_timeout, Duration::from_secs(10));
        assert!(cfg.default_model.is_none());
    }

    #[test]
    fn test_cli_max_panes_wins_and_clamps_initial() {
        let mut fc = FileConfig::default();
        fc.panes.max = 6;
        fc.panes.initial = 5;
        let cfg = ChatConfig::from_file(
            &fc,
            &CliOverrides {
                max_panes: Some(2),
            },
        );
        assert_eq!(cfg.max_panes, 2);
        assert_eq!(cfg.initial_panes, 2);
    }

    #[test]
    fn test_zero_panes_is_raised() {
        let mut fc = FileConfig::default();
        fc.panes.max = 0;
        fc.panes.initial = 0;
        let cfg = ChatConfig::from_file(&fc, &CliOverrides::default());
        assert_eq!(cfg.max_panes, 1);
        assert_eq!(cfg.initial_panes, 1);
    }

    #[test]
    fn test_reconnect_enabled_builds_fixed_policy() {
        let mut fc = FileConfig::default();
        fc.reconnect.enabled = true;
        fc.reconnect.max_attempts = 5;
        fc.reconnect.delay_ms = 250;
        let cfg = ChatConfig::from_file(&fc, &CliOverrides::default());
        assert_eq!(
            cfg.reconnect,
            ReconnectPolicy::Fixed {
                max_attempts: 5,
                delay: Duration::from_millis(250),
            }
        );
    }

    #[test]
    fn test_explicit_ws_url_is_kept() {
        let mut fc = FileConfig::default();
        fc.backend.ws_url = Some("ws://elsewhere/stream".to_string());
        let cfg = ChatConfig::from_file(&fc, &CliOverrides::default());
        assert_eq!(cfg.ws_url, "ws://elsewhere/stream");
    }

    #[test]
    fn test_load_config_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc = extract(tmp.path());
        assert_eq!(fc.panes.max, 4);
        assert_eq!(fc.messages, MessageTemplates::default());
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[backend]\napi_url = \"http://docs:8000/api\"\n\n[panes]\nmax = 3\ninitial = 2\n\n[session]\ndefault_model = \"mistral\"\n",
        )
        .unwrap();
        let fc = extract(tmp.path());
        assert_eq!(fc.backend.api_url, "http://docs:8000/api");
        assert_eq!(fc.backend.request_timeout_secs, 10);
        assert_eq!(fc.panes.max, 3);
        assert_eq!(fc.panes.initial, 2);
        assert_eq!(fc.session.default_model.as_deref(), Some("mistral"));
        assert_eq!(fc.session.language, "en");
    }

    #[test]
    fn test_load_config_partial_messages() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[messages]\ngreeting = \"Bonjour !\"\n",
        )
        .unwrap();
        let fc = extract(tmp.path());
        assert_eq!(fc.messages.greeting, "Bonjour !");
        assert_eq!(
            fc.messages.empty_query,
            MessageTemplates::default().empty_query
        );
    }

    #[test]
    fn test_config_dir_custom() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = config_dir(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(dir, tmp.path());
    }
}
