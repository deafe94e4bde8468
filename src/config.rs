//! Client configuration file.
//!
//! A plain text file of `KEY=VALUE` lines, read from `.env` next to the
//! client executable:
//!
//! ```text
//! BACKEND_IP=192.168.1.20
//! BACKEND_PORT=8888
//! ```

use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::warn;

use crate::server::DEFAULT_PORT;
use crate::Result;

/// File name looked up next to the client executable.
pub const CONFIG_FILE_NAME: &str = ".env";

const DEFAULT_HOST: &str = "127.0.0.1";

/// Where the client should connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server host or IP.
    pub backend_ip: String,
    /// Server port.
    pub backend_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            backend_ip: DEFAULT_HOST.to_owned(),
            backend_port: DEFAULT_PORT,
        }
    }
}

impl ClientConfig {
    /// Parses file contents. Unknown keys, blank lines and `#` comments are
    /// ignored; a missing or unparseable port falls back to the default.
    pub fn parse(contents: &str) -> Self {
        let mut config = ClientConfig::default();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "BACKEND_IP" if !value.is_empty() => config.backend_ip = value.to_owned(),
                "BACKEND_PORT" => match value.parse() {
                    Ok(port) => config.backend_port = port,
                    Err(_) => warn!(
                        "Ignoring invalid BACKEND_PORT {:?}, using {}",
                        value, DEFAULT_PORT
                    ),
                },
                _ => {}
            }
        }
        config
    }

    /// Loads `path`. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Self::parse(&contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("{} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `.env` in the directory holding the running executable, or in the
    /// current directory when that cannot be determined.
    pub fn default_path() -> PathBuf {
        match env::current_exe() {
            Ok(exe) => exe
                .parent()
                .map(|dir| dir.join(CONFIG_FILE_NAME))
                .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME)),
            Err(e) => {
                warn!("Could not determine executable path ({}), using current directory", e);
                PathBuf::from(CONFIG_FILE_NAME)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn parses_both_keys() {
        let config = ClientConfig::parse("BACKEND_IP=10.0.0.7\nBACKEND_PORT=9000\n");
        assert_eq!(config.backend_ip, "10.0.0.7");
        assert_eq!(config.backend_port, 9000);
    }

    #[test]
    fn bad_or_missing_port_defaults() {
        let config = ClientConfig::parse("BACKEND_IP=10.0.0.7\nBACKEND_PORT=eighty\n");
        assert_eq!(config.backend_port, 8888);
        let config = ClientConfig::parse("# only a comment\n\nOTHER=1\n");
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn missing_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::load(dir.path().join(".env")).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "BACKEND_IP = 192.168.0.2").unwrap();
        writeln!(file, "BACKEND_PORT = 7000").unwrap();
        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.backend_ip, "192.168.0.2");
        assert_eq!(config.backend_port, 7000);
    }
}
