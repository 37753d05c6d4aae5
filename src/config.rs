use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use anyhow::Context;

#[derive(Clone, Debug)]
pub struct Config {
    pub target: Target,
    pub ack_mode: AckMode,
    pub log: String,
}

impl Config {
    /// Creates a configuration for the given target with default settings.
    pub fn new(target: Target) -> Self {
        Self {
            target,
            ack_mode: AckMode::default(),
            log: "warn".into(),
        }
    }

    #[cfg(feature = "bin")]
    pub fn from_args() -> anyhow::Result<Self> {
        use clap::{Arg, ArgAction, Command};

        let matches = Command::new("vsock-proxy")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Proxies stdin/stdout to a multiplexed vsock channel behind a Unix socket.")
            .args(&[
                Arg::new("SOCKET_PATH")
                    .required(true)
                    .num_args(1)
                    .env("VSOCK_PROXY_SOCKET_PATH")
                    .help("Path to the Unix socket exposed by the virtual machine monitor. Example: /run/vm/v.sock"),
                Arg::new("PORT")
                    .required(true)
                    .num_args(1)
                    .env("VSOCK_PROXY_PORT")
                    .help("The guest port to request with the CONNECT handshake. Example: 22"),
                Arg::new("strip-ack")
                    .long("strip-ack")
                    .action(ArgAction::SetTrue)
                    .env("VSOCK_PROXY_STRIP_ACK")
                    .help("Do not write the 'OK <port>' acknowledgment line to stdout, only the payload that follows it."),
                Arg::new("log")
                    .required(false)
                    .num_args(1)
                    .long("log")
                    .env("VSOCK_PROXY_LOG")
                    .default_value("warn")
                    .help("Configures the log level and format. Logs are written to stderr."),
            ])
            .get_matches();

        let socket_path = matches
            .get_one::<String>("SOCKET_PATH")
            .with_context(|| "Missing socket path")?;
        let port = matches
            .get_one::<String>("PORT")
            .with_context(|| "Missing port")?;

        Ok(Self {
            target: Target::new(socket_path, port).with_context(|| "Invalid target")?,
            ack_mode: if matches.get_flag("strip-ack") {
                AckMode::Strip
            } else {
                AckMode::Forward
            },
            log: matches
                .get_one::<String>("log")
                .cloned()
                .unwrap_or_else(|| "warn".into()),
        })
    }
}

/// The socket to connect to and the multiplexed channel to request on it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Target {
    socket_path: PathBuf,
    port: String,
}

impl Target {
    /// The port is kept as given so the request line carries it verbatim.
    pub fn new(socket_path: impl Into<PathBuf>, port: &str) -> anyhow::Result<Self> {
        let socket_path = socket_path.into();
        if socket_path.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("Socket path must not be empty"));
        }
        Ok(Self {
            socket_path,
            port: parse_port(port)?,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// The handshake line sent right after connecting.
    pub fn request_line(&self) -> String {
        format!("CONNECT {}\n", self.port)
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.socket_path.display(), self.port)
    }
}

/// What happens to the acknowledgment line on stdout.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum AckMode {
    /// Every byte read from the socket is forwarded, the acknowledgment included.
    #[default]
    Forward,
    /// Bytes are held until the acknowledgment is recognized; only what follows it is forwarded.
    Strip,
}

impl Display for AckMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Strip => write!(f, "strip"),
        }
    }
}

fn parse_port(s: &str) -> anyhow::Result<String> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(anyhow::anyhow!(
            "Port must be a decimal number, got '{}'",
            s
        ));
    }
    Ok(s.to_string())
}
