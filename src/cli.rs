use clap::{App, Arg};

pub const CONFIG: &str = "config";
pub const BEACON_NODE_URL: &str = "beacon-node-url";
pub const PUBKEYS_FILE: &str = "pubkeys-file";
pub const DATA_DIR: &str = "data-dir";
pub const LISTEN_ADDRESS: &str = "listen-address";
pub const LISTEN_PORT: &str = "listen-port";
pub const LOG_LEVEL: &str = "log-level";

pub fn app<'a, 'b>() -> App<'a, 'b> {
    App::new("duty_watch")
        .author("Sigma Prime <contact@sigmaprime.io>")
        .about("Watches a set of validators for proposer and sync committee duties")
        .setting(clap::AppSettings::ColoredHelp)
        .arg(
            Arg::with_name(CONFIG)
                .long(CONFIG)
                .value_name("PATH_TO_CONFIG")
                .help("Path to configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name(BEACON_NODE_URL)
                .long(BEACON_NODE_URL)
                .value_name("URL")
                .help("Base URL of the beacon node REST API")
                .takes_value(true),
        )
        .arg(
            Arg::with_name(PUBKEYS_FILE)
                .long(PUBKEYS_FILE)
                .value_name("PATH")
                .help("File containing one watched validator public key per line")
                .takes_value(true),
        )
        .arg(
            Arg::with_name(DATA_DIR)
                .long(DATA_DIR)
                .value_name("PATH")
                .help("Directory holding the validator snapshot and duty ledgers")
                .takes_value(true),
        )
        .arg(
            Arg::with_name(LISTEN_ADDRESS)
                .long(LISTEN_ADDRESS)
                .value_name("ADDRESS")
                .help("IPv4 address the query server listens on")
                .takes_value(true),
        )
        .arg(
            Arg::with_name(LISTEN_PORT)
                .long(LISTEN_PORT)
                .value_name("PORT")
                .help("Port the query server listens on")
                .takes_value(true),
        )
        .arg(
            Arg::with_name(LOG_LEVEL)
                .long(LOG_LEVEL)
                .value_name("LEVEL")
                .help("One of error, warn, info, debug, trace")
                .takes_value(true),
        )
}
