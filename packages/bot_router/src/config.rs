use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Unified config (figment-deserialized from defaults / TOML file / env vars)
// =============================================================================
//
// Equivalent ways to set the listen port:
//
//   bot-router.toml:  [server]
//                     port = 8080
//
//   env var:          BOT_ROUTER_SERVER__PORT=8080   (double underscore = nesting)
//
//   legacy env var:   ROUTER_PORT=8080

/// Default backend command line. Placeholders are filled per bridge by the
/// launcher: `{port}`, `{bot_name}`, `{bot_path}` (percent-encoded name),
/// `{session_id}`, `{tmux_socket}`.
pub const DEFAULT_BRIDGE_ARGS: &[&str] = &[
    "-p",
    "{port}",
    "-W",
    "-i",
    "127.0.0.1",
    "-b",
    "/{bot_path}",
    "tmux",
    "-S",
    "{tmux_socket}",
    "attach-session",
    "-t",
    "{session_id}",
];

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub auth: AuthFileConfig,
    #[serde(default)]
    pub directory: DirectoryFileConfig,
    #[serde(default)]
    pub bridge: BridgeFileConfig,
}

/// Listener settings (lives under `[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Shared-secret settings (lives under `[auth]`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthFileConfig {
    /// When unset a random token is generated at startup.
    #[serde(default)]
    pub token: Option<String>,
}

/// Session directory store (lives under `[directory]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DirectoryFileConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_directory_key")]
    pub key: String,
}

impl Default for DirectoryFileConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            key: default_directory_key(),
        }
    }
}

/// Backend bridge process settings (lives under `[bridge]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BridgeFileConfig {
    #[serde(default = "default_bridge_program")]
    pub program: String,
    #[serde(default = "default_bridge_args")]
    pub args: Vec<String>,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    /// Multiplexer socket handed to the bridge. Defaults to tmux's per-user socket.
    #[serde(default)]
    pub tmux_socket: Option<String>,
    #[serde(default = "default_readiness_timeout_ms")]
    pub readiness_timeout_ms: u64,
    #[serde(default = "default_readiness_poll_ms")]
    pub readiness_poll_ms: u64,
}

impl Default for BridgeFileConfig {
    fn default() -> Self {
        Self {
            program: default_bridge_program(),
            args: default_bridge_args(),
            base_port: default_base_port(),
            tmux_socket: None,
            readiness_timeout_ms: default_readiness_timeout_ms(),
            readiness_poll_ms: default_readiness_poll_ms(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    12345
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}
fn default_directory_key() -> String {
    "tts:session_map".to_string()
}
fn default_bridge_program() -> String {
    "ttyd".to_string()
}
fn default_bridge_args() -> Vec<String> {
    DEFAULT_BRIDGE_ARGS.iter().map(|s| s.to_string()).collect()
}
fn default_base_port() -> u16 {
    13000
}
fn default_readiness_timeout_ms() -> u64 {
    5000
}
fn default_readiness_poll_ms() -> u64 {
    50
}

pub fn default_tmux_socket() -> String {
    #[cfg(unix)]
    {
        format!("/tmp/tmux-{}/default", nix::unistd::getuid())
    }
    #[cfg(not(unix))]
    {
        "/tmp/tmux-0/default".to_string()
    }
}

/// Map the env var names the router historically used onto config keys.
pub fn legacy_env_key(name: &str) -> Option<&'static str> {
    match name.to_ascii_uppercase().as_str() {
        "ROUTER_PORT" => Some("server.port"),
        "ROUTER_TOKEN" => Some("auth.token"),
        "TMUX_SOCKET" => Some("bridge.tmux_socket"),
        "REDIS_URL" => Some("directory.redis_url"),
        _ => None,
    }
}

/// Env vars holding the token, lowest precedence first. Read verbatim so a
/// numeric secret like `007123` is not parsed as an integer.
const TOKEN_ENV_VARS: &[&str] = &["ROUTER_TOKEN", "BOT_ROUTER_AUTH__TOKEN"];

/// Build a figment that layers: defaults → TOML file → legacy env vars → BOT_ROUTER_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `BOT_ROUTER_AUTH__TOKEN=secret`  →  `auth.token = "secret"`
///   `BOT_ROUTER_BRIDGE__BASE_PORT=20000`  →  `bridge.base_port = 20000`
pub fn load_config(config_file: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let legacy = Env::raw().filter_map(|key| {
        legacy_env_key(key.as_str())
            .filter(|mapped| *mapped != "auth.token")
            .map(Into::into)
    });
    let prefixed = Env::prefixed("BOT_ROUTER_")
        .filter(|key| !key.as_str().eq_ignore_ascii_case("auth__token"))
        .split("__");

    let mut figment = Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_file))
        .merge(legacy)
        .merge(prefixed);

    for var in TOKEN_ENV_VARS {
        if let Ok(token) = std::env::var(var) {
            figment = figment.merge(Serialized::default("auth.token", token));
        }
    }
    figment
}

// =============================================================================
// Runtime config structs (derived from FileConfig)
// =============================================================================

/// Listener configuration (runtime view).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: SocketAddr,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig) -> Result<Self> {
        let addr = format!("{}:{}", fc.host, fc.port)
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid listen address {}:{}", fc.host, fc.port))?;
        Ok(Self { addr })
    }
}

/// Authentication configuration (runtime view).
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub token: String,
    /// Whether the token was generated because none was configured
    pub generated: bool,
}

impl AuthConfig {
    pub fn from_file(fc: &AuthFileConfig) -> Self {
        match fc.token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => Self {
                token: token.to_string(),
                generated: false,
            },
            None => Self {
                token: crate::auth::generate_token(),
                generated: true,
            },
        }
    }
}

/// How bridges are launched (runtime view).
#[derive(Clone, Debug)]
pub struct LaunchConfig {
    pub program: String,
    pub args: Vec<String>,
    pub base_port: u16,
    pub tmux_socket: String,
}

impl LaunchConfig {
    pub fn from_file(fc: &BridgeFileConfig) -> Self {
        Self {
            program: fc.program.clone(),
            args: fc.args.clone(),
            base_port: fc.base_port,
            tmux_socket: fc.tmux_socket.clone().unwrap_or_else(default_tmux_socket),
        }
    }
}

/// Readiness probe tuning (runtime view).
#[derive(Clone, Copy, Debug)]
pub struct ReadinessConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl ReadinessConfig {
    pub fn from_file(fc: &BridgeFileConfig) -> Self {
        Self {
            timeout: Duration::from_millis(fc.readiness_timeout_ms),
            poll_interval: Duration::from_millis(fc.readiness_poll_ms.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn test_server_defaults() {
        let d = ServerFileConfig::default();
        assert_eq!(d.host, "0.0.0.0");
        assert_eq!(d.port, 12345);
    }

    #[test]
    fn test_directory_defaults() {
        let d = DirectoryFileConfig::default();
        assert_eq!(d.redis_url, "redis://127.0.0.1:6379/");
        assert_eq!(d.key, "tts:session_map");
    }

    #[test]
    fn test_bridge_defaults() {
        let d = BridgeFileConfig::default();
        assert_eq!(d.program, "ttyd");
        assert_eq!(d.base_port, 13000);
        assert_eq!(d.readiness_timeout_ms, 5000);
        assert!(d.tmux_socket.is_none());
        assert!(d.args.iter().any(|a| a == "{session_id}"));
        assert!(d.args.iter().any(|a| a == "/{bot_path}"));
        assert!(d.args.iter().any(|a| a == "{port}"));
    }

    #[cfg(unix)]
    #[test]
    fn test_default_tmux_socket_is_per_user() {
        let socket = default_tmux_socket();
        assert!(socket.starts_with("/tmp/tmux-"));
        assert!(socket.ends_with("/default"));
    }

    // ── legacy env names ────────────────────────────────────────────────

    #[test]
    fn test_legacy_env_keys() {
        assert_eq!(legacy_env_key("ROUTER_PORT"), Some("server.port"));
        assert_eq!(legacy_env_key("router_token"), Some("auth.token"));
        assert_eq!(legacy_env_key("TMUX_SOCKET"), Some("bridge.tmux_socket"));
        assert_eq!(legacy_env_key("REDIS_URL"), Some("directory.redis_url"));
        assert_eq!(legacy_env_key("PATH"), None);
    }

    // ── runtime views ───────────────────────────────────────────────────

    #[test]
    fn test_server_config_from_file() {
        let sc = ServerConfig::from_file(&ServerFileConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
        })
        .unwrap();
        assert_eq!(sc.addr, "127.0.0.1:8080".parse().unwrap());
    }

    #[test]
    fn test_server_config_rejects_bad_host() {
        let result = ServerConfig::from_file(&ServerFileConfig {
            host: "not a host".to_string(),
            port: 8080,
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_auth_config_uses_configured_token() {
        let ac = AuthConfig::from_file(&AuthFileConfig {
            token: Some("s3cret".to_string()),
        });
        assert_eq!(ac.token, "s3cret");
        assert!(!ac.generated);
    }

    #[test]
    fn test_auth_config_generates_token_when_missing_or_empty() {
        for token in [None, Some(String::new())] {
            let ac = AuthConfig::from_file(&AuthFileConfig { token });
            assert!(ac.generated);
            assert_eq!(ac.token.len(), 32);
        }
    }

    #[test]
    fn test_launch_config_explicit_socket() {
        let lc = LaunchConfig::from_file(&BridgeFileConfig {
            tmux_socket: Some("/run/tmux.sock".to_string()),
            ..Default::default()
        });
        assert_eq!(lc.tmux_socket, "/run/tmux.sock");
        assert_eq!(lc.program, "ttyd");
    }

    #[test]
    fn test_readiness_config_clamps_zero_interval() {
        let rc = ReadinessConfig::from_file(&BridgeFileConfig {
            readiness_timeout_ms: 250,
            readiness_poll_ms: 0,
            ..Default::default()
        });
        assert_eq!(rc.timeout, Duration::from_millis(250));
        assert_eq!(rc.poll_interval, Duration::from_millis(1));
    }

    // ── load_config ─────────────────────────────────────────────────────

    #[test]
    fn test_load_config_missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(&tmp.path().join("absent.toml"))
            .extract()
            .unwrap();
        assert_eq!(fc.directory.key, "tts:session_map");
        assert_eq!(fc.bridge.program, "ttyd");
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bot-router.toml");
        std::fs::write(
            &path,
            "[directory]\nkey = \"bots\"\n\n[bridge]\nprogram = \"/usr/local/bin/ttyd\"\nbase_port = 20000\nreadiness_poll_ms = 10\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(&path).extract().unwrap();
        assert_eq!(fc.directory.key, "bots");
        assert_eq!(fc.bridge.program, "/usr/local/bin/ttyd");
        assert_eq!(fc.bridge.base_port, 20000);
        assert_eq!(fc.bridge.readiness_poll_ms, 10);
        // Untouched keys keep their defaults
        assert_eq!(fc.bridge.readiness_timeout_ms, 5000);
    }

    #[test]
    fn test_load_config_custom_args() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bot-router.toml");
        std::fs::write(
            &path,
            "[bridge]\nargs = [\"--port\", \"{port}\", \"--session\", \"{session_id}\"]\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(&path).extract().unwrap();
        assert_eq!(fc.bridge.args, vec!["--port", "{port}", "--session", "{session_id}"]);
    }

    #[test]
    fn test_load_config_env_layers() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("bot-router.toml", "[auth]\ntoken = \"from-file\"\n")?;
            jail.set_env("ROUTER_PORT", "8080");
            let fc: FileConfig = load_config(Path::new("bot-router.toml")).extract()?;
            assert_eq!(fc.server.port, 8080);
            assert_eq!(fc.auth.token.as_deref(), Some("from-file"));

            jail.set_env("BOT_ROUTER_SERVER__PORT", "9090");
            let fc: FileConfig = load_config(Path::new("bot-router.toml")).extract()?;
            assert_eq!(fc.server.port, 9090);
            Ok(())
        });
    }

    #[test]
    fn test_numeric_env_token_stays_a_string() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("ROUTER_TOKEN", "007123");
            let fc: FileConfig = load_config(Path::new("absent.toml")).extract()?;
            assert_eq!(fc.auth.token.as_deref(), Some("007123"));

            // The prefixed name wins over the legacy one
            jail.set_env("BOT_ROUTER_AUTH__TOKEN", "200898");
            let fc: FileConfig = load_config(Path::new("absent.toml")).extract()?;
            assert_eq!(fc.auth.token.as_deref(), Some("200898"));
            Ok(())
        });
    }

    #[test]
    fn test_load_config_rejects_wrong_types() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bot-router.toml");
        std::fs::write(&path, "[bridge]\nbase_port = \"not a port\"\n").unwrap();
        let result: Result<FileConfig, _> = load_config(&path).extract();
        assert!(result.is_err());
    }
}
