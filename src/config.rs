use crate::cli;
use clap::ArgMatches;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::net::Ipv4Addr;
use std::path::PathBuf;

pub const DEFAULT_BEACON_NODE_URL: &str = "http://localhost:5052";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the beacon node REST API.
    pub beacon_node_url: String,
    /// File containing one watched validator public key per line.
    pub pubkeys_file: PathBuf,
    /// Directory holding the validator snapshot and duty ledgers.
    pub data_dir: PathBuf,
    pub server_listen_addr: Ipv4Addr,
    pub server_listen_port: u16,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            beacon_node_url: DEFAULT_BEACON_NODE_URL.to_string(),
            pubkeys_file: PathBuf::from("pubkeys"),
            data_dir: PathBuf::from("data"),
            server_listen_addr: Ipv4Addr::new(127, 0, 0, 1),
            server_listen_port: 5058,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load_from_file(path_to_file: String) -> Result<Config, String> {
        let file =
            File::open(path_to_file).map_err(|e| format!("Error reading config file: {:?}", e))?;
        let config: Config =
            serde_yaml::from_reader(file).map_err(|e| format!("Error parsing config file: {:?}", e))?;
        Ok(config)
    }

    /// Applies command-line overrides on top of the file or default config.
    pub fn apply_cli_overrides(&mut self, matches: &ArgMatches) -> Result<(), String> {
        if let Some(url) = matches.value_of(cli::BEACON_NODE_URL) {
            self.beacon_node_url = url.to_string();
        }
        if let Some(path) = matches.value_of(cli::PUBKEYS_FILE) {
            self.pubkeys_file = PathBuf::from(path);
        }
        if let Some(path) = matches.value_of(cli::DATA_DIR) {
            self.data_dir = PathBuf::from(path);
        }
        if let Some(addr) = matches.value_of(cli::LISTEN_ADDRESS) {
            self.server_listen_addr = addr
                .parse()
                .map_err(|e| format!("Invalid listen address: {:?}", e))?;
        }
        if let Some(port) = matches.value_of(cli::LISTEN_PORT) {
            self.server_listen_port = port
                .parse()
                .map_err(|e| format!("Invalid listen port: {:?}", e))?;
        }
        if let Some(level) = matches.value_of(cli::LOG_LEVEL) {
            self.log_level = level.to_string();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn loads_partial_yaml_over_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"beacon_node_url: \"http://bn.example:5052\"\nserver_listen_port: 9000\n")
            .unwrap();

        let config = Config::load_from_file(path.to_str().unwrap().to_string()).unwrap();
        assert_eq!(config.beacon_node_url, "http://bn.example:5052");
        assert_eq!(config.server_listen_port, 9000);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn cli_overrides_take_precedence() {
        let matches = cli::app().get_matches_from(vec![
            "duty_watch",
            "--beacon-node-url",
            "http://other:5052",
            "--listen-port",
            "0",
        ]);
        let mut config = Config::default();
        config.apply_cli_overrides(&matches).unwrap();
        assert_eq!(config.beacon_node_url, "http://other:5052");
        assert_eq!(config.server_listen_port, 0);
    }
}
