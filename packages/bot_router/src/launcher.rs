use bridge_supervisor::BridgeConfig;

use crate::config::LaunchConfig;

/// Turns a (bot, session, port) triple into a bridge command line.
#[derive(Clone, Debug)]
pub struct BridgeLauncher {
    program: String,
    args: Vec<String>,
    tmux_socket: String,
}

impl BridgeLauncher {
    pub fn new(program: impl Into<String>, args: Vec<String>, tmux_socket: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            tmux_socket: tmux_socket.into(),
        }
    }

    pub fn from_config(config: &LaunchConfig) -> Self {
        Self::new(
            config.program.clone(),
            config.args.clone(),
            config.tmux_socket.clone(),
        )
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// `{bot_path}` is the name percent-encoded the way listing links encode
    /// it, so a bridge base path matches the request path the router sees.
    pub fn command(&self, bot_name: &str, session_id: &str, port: u16) -> BridgeConfig {
        let port = port.to_string();
        let bot_path = urlencoding::encode(bot_name);
        let vars = [
            ("port", port.as_str()),
            ("bot_name", bot_name),
            ("bot_path", bot_path.as_ref()),
            ("session_id", session_id),
            ("tmux_socket", self.tmux_socket.as_str()),
        ];
        BridgeConfig {
            program: self.program.clone(),
            args: self.args.iter().map(|arg| render(arg, &vars)).collect(),
            env: Vec::new(),
        }
    }
}

/// Substitute `{name}` placeholders in one pass.
///
/// Substituted text is never rescanned, so a session id containing braces
/// cannot inject another placeholder. Unknown placeholders are left as-is.
fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let substituted = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });
        match substituted {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
