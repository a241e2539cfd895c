use clap::{error::ErrorKind, ArgAction, Parser};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::str::FromStr as _;
use std::time::Duration;
use std::{env, fs};
use toml::value::{Table, Value};

use tunnel_core::model::{Coins, NodeKey};
use tunnel_util::config::parse_rotation;
pub use tunnel_util::config::{
    DEFAULT_DB_DIR, DEFAULT_DIR, DEFAULT_LOG_FILENAME, DEFAULT_LOG_MAX_BACKUPS,
    DEFAULT_LOG_ROTATION, DEFAULT_VERBOSITY,
};
use tunnel_util::observability::{LogFile, Rotation};

/// Key of the local payment node in dev mode
pub const DEFAULT_NODE_KEY: &str =
    "0101010101010101010101010101010101010101010101010101010101010101";

/// Starting balance of the dev-mode wallet
pub const DEFAULT_WALLET_BALANCE: &str = "10";

/// Config files may include other config files, up to this depth
const MAX_CONFIG_DEPTH: usize = 8;

// only used for usage display
#[derive(Parser, Debug)]
#[clap(about, long_about = None)]
pub struct InitialArgs {
    #[clap(
        short = 'f',
        long,
        value_parser,
        help = "configuration file - MUST be the first argument",
        value_name = "FILE"
    )]
    config: Option<String>,
}

#[derive(Parser, Debug)]
#[clap(about, long_about = None, args_override_self = true)]
pub struct NodeArgs {
    #[clap(flatten)]
    initial_args: InitialArgs,

    #[clap(long, help = "print git desc version and exit")]
    pub git_desc: bool,

    #[clap(short, long, value_parser, help = "data directory", value_name = "DIR")]
    pub datadir: Option<PathBuf>,

    #[clap(
        short,
        long,
        help = "verbosity: 0 error, 1 warn, 2 info, 3 debug, 4 debug including the chain scanner",
        value_name = "N",
        default_value_t = DEFAULT_VERBOSITY
    )]
    pub verbosity: u8,

    #[clap(
        long,
        value_parser = parse_node_key,
        help = "payment node key (hex) to prioritize and deploy a channel with",
        value_name = "HEX"
    )]
    pub payment_node: Option<NodeKey>,

    #[clap(
        long,
        help = "enable paid tunnelling",
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true"
    )]
    pub payments_enabled: bool,

    #[clap(
        long,
        value_parser = Coins::from_str,
        help = "minimum price per routed packet",
        value_name = "COINS",
        default_value = "0"
    )]
    pub min_price_per_packet_route: Coins,

    #[clap(
        long,
        value_parser = Coins::from_str,
        help = "minimum price per packet entering or leaving the tunnel",
        value_name = "COINS",
        default_value = "0"
    )]
    pub min_price_per_packet_in_out: Coins,

    #[clap(long, value_parser, help = "payments database directory", value_name = "DIR")]
    pub db_path: Option<PathBuf>,

    #[clap(
        long,
        help = "log file name in the data directory",
        default_value = DEFAULT_LOG_FILENAME
    )]
    pub log_filename: String,

    #[clap(
        long,
        help = "log to stdout only",
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true"
    )]
    pub log_disable_file: bool,

    #[clap(
        long,
        value_parser = parse_rotation,
        help = "log file rotation: never, minutely, hourly or daily",
        value_name = "PERIOD",
        default_value = DEFAULT_LOG_ROTATION
    )]
    pub log_rotation: Rotation,

    #[clap(
        long,
        help = "rotated log files to keep, 0 keeps all",
        value_name = "N",
        default_value_t = DEFAULT_LOG_MAX_BACKUPS
    )]
    pub log_max_backups: usize,

    #[clap(
        long,
        value_parser,
        help = "serve gateway counters for Prometheus on this address",
        value_name = "ADDR"
    )]
    pub metrics_listen_addr: Option<SocketAddr>,

    #[clap(
        long,
        help = "give up waiting for channel readiness after this many seconds",
        value_name = "SECS"
    )]
    pub readiness_deadline: Option<u64>,

    #[clap(
        long,
        value_parser = parse_node_key,
        help = "key of our own payment node (hex)",
        value_name = "HEX",
        default_value = DEFAULT_NODE_KEY
    )]
    pub node_key: NodeKey,

    #[clap(
        long,
        value_parser = Coins::from_str,
        help = "starting balance of the local wallet",
        value_name = "COINS",
        default_value = DEFAULT_WALLET_BALANCE
    )]
    pub wallet_balance: Coins,
}

impl NodeArgs {
    /// The data directory, `$HOME/.tunnel-node` unless given
    pub fn resolve_datadir(&self) -> Option<PathBuf> {
        self.datadir.clone().or_else(|| dirs::home_dir().map(|home| home.join(DEFAULT_DIR)))
    }

    pub fn resolve_db_path(&self, datadir: &Path) -> PathBuf {
        self.db_path.clone().unwrap_or_else(|| datadir.join(DEFAULT_DB_DIR))
    }

    pub fn readiness_deadline(&self) -> Option<Duration> {
        self.readiness_deadline.map(Duration::from_secs)
    }

    /// The file log in `datadir`, unless disabled
    pub fn log_file<'a>(&'a self, datadir: &'a Path) -> Option<LogFile<'a>> {
        (!self.log_disable_file).then(|| LogFile {
            dir: datadir,
            filename: &self.log_filename,
            rotation: self.log_rotation.clone(),
            max_files: self.log_max_backups,
        })
    }
}

fn parse_node_key(s: &str) -> Result<NodeKey, String> {
    NodeKey::from_hex(s).map_err(|e| e.to_string())
}

pub fn parse_args_and_config(bin_name: &str) -> NodeArgs {
    let env_args = env::args().collect::<Vec<_>>();
    parse_args_and_config_from(bin_name, &env_args).unwrap_or_else(|e| match e.kind() {
        ErrorKind::DisplayVersion => exit(0), // exit directly because no Command
        _ => e.exit(),
    })
}

pub fn parse_args_and_config_from(
    bin_name: &str,
    env_args: &[String],
) -> Result<NodeArgs, clap::Error> {
    let expanded = expand_config_args(env_args.to_vec(), 0)?;
    let args = NodeArgs::try_parse_from(expanded)?;

    // short-circuit if we're just printing the git desc
    if args.git_desc {
        println!("{} git_desc={}", bin_name, tunnel_util::GIT_DESC);
        // Don't exit here because this is called by unit tests
        return Err(clap::Error::raw(ErrorKind::DisplayVersion, ""));
    }

    Ok(args)
}

/// Replace every `--config FILE` / `-f FILE` / `--config=FILE` with the file's settings, in place
fn expand_config_args(args: Vec<String>, depth: usize) -> Result<Vec<String>, clap::Error> {
    let mut expanded = Vec::with_capacity(args.len());
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let path = if let Some(path) = arg.strip_prefix("--config=") {
            path.to_string()
        } else if arg == "--config" || arg == "-f" {
            match args.next() {
                Some(path) => path,
                None => {
                    // let clap handle the error
                    expanded.push(arg);
                    continue;
                }
            }
        } else {
            expanded.push(arg);
            continue;
        };
        if depth >= MAX_CONFIG_DEPTH {
            return Err(clap::Error::raw(
                ErrorKind::ValueValidation,
                format!("config file {} nested too deep\n", path),
            ));
        }
        expanded.extend(expand_config_args(toml_to_configs(&path)?, depth + 1)?);
    }
    Ok(expanded)
}

fn toml_to_configs(path: &str) -> Result<Vec<String>, clap::Error> {
    let contents = fs::read_to_string(path).map_err(|e| {
        clap::Error::raw(ErrorKind::Io, format!("cannot read config file {}: {}\n", path, e))
    })?;
    let config: Table = toml::from_str(contents.as_str()).map_err(|e| {
        clap::Error::raw(ErrorKind::InvalidValue, format!("bad config file {}: {}\n", path, e))
    })?;
    let configs = config
        .into_iter()
        .flat_map(|(k, value)| convert_toml_value(k, value))
        .map(|(k, v)| format!("--{}={}", k, v))
        .collect();
    Ok(configs)
}

fn convert_toml_value(key: String, value: Value) -> Vec<(String, String)> {
    match value {
        Value::String(s) => vec![(key, s)],
        Value::Integer(v) => vec![(key, v.to_string())],
        Value::Float(v) => vec![(key, v.to_string())],
        Value::Boolean(v) => vec![(key, v.to_string())],
        Value::Datetime(v) => vec![(key, v.to_string())],
        Value::Array(a) =>
            a.into_iter().flat_map(|v| convert_toml_value(key.clone(), v)).collect::<Vec<_>>(),
        Value::Table(_) => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn to_args(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn git_desc_test() {
        let env_args = to_args(&["tunnel-noded", "--git-desc"]);
        let args_res = parse_args_and_config_from("", &env_args);
        assert_eq!(args_res.unwrap_err().kind(), ErrorKind::DisplayVersion);
    }

    #[test]
    fn clap_test() {
        let env_args = to_args(&["tunnel-noded"]);
        let args = parse_args_and_config_from("", &env_args).unwrap();
        assert_eq!(args.verbosity, DEFAULT_VERBOSITY);
        assert!(!args.payments_enabled);
        assert!(args.payment_node.is_none());
        assert_eq!(args.min_price_per_packet_route, Coins::ZERO);
        assert_eq!(args.log_filename, DEFAULT_LOG_FILENAME);
        assert_eq!(args.readiness_deadline(), None);
        assert_eq!(args.node_key, NodeKey::new([1; 32]));

        let peer = "20".repeat(32);
        let env_args = to_args(&[
            "tunnel-noded",
            "--datadir=/tmp/tunnel",
            "-v",
            "4",
            "--payment-node",
            &peer,
            "--payments-enabled",
            "--min-price-per-packet-route",
            "0.5",
            "--min-price-per-packet-in-out=0.000000002",
            "--log-disable-file",
            "--readiness-deadline",
            "30",
        ]);
        let args = parse_args_and_config_from("", &env_args).unwrap();
        assert_eq!(args.datadir.clone().unwrap(), PathBuf::from("/tmp/tunnel"));
        assert_eq!(args.verbosity, 4);
        assert_eq!(args.payment_node, Some(NodeKey::new([0x20; 32])));
        assert!(args.payments_enabled);
        assert_eq!(args.min_price_per_packet_route, Coins::from_nano(500_000_000));
        assert_eq!(args.min_price_per_packet_in_out, Coins::from_nano(2));
        assert!(args.log_disable_file);
        assert_eq!(args.readiness_deadline(), Some(Duration::from_secs(30)));
        assert_eq!(
            args.resolve_db_path(Path::new("/tmp/tunnel")),
            PathBuf::from("/tmp/tunnel").join(DEFAULT_DB_DIR)
        );
    }

    #[test]
    fn log_and_metrics_flags_test() {
        let env_args = to_args(&["tunnel-noded"]);
        let args = parse_args_and_config_from("", &env_args).unwrap();
        assert_eq!(args.log_rotation, Rotation::NEVER);
        assert_eq!(args.log_max_backups, DEFAULT_LOG_MAX_BACKUPS);
        assert!(args.metrics_listen_addr.is_none());
        let log_file = args.log_file(Path::new("/tmp/tunnel")).unwrap();
        assert_eq!(log_file.filename, DEFAULT_LOG_FILENAME);
        assert_eq!(log_file.max_files, DEFAULT_LOG_MAX_BACKUPS);

        let env_args = to_args(&[
            "tunnel-noded",
            "--log-rotation=hourly",
            "--log-max-backups",
            "4",
            "--metrics-listen-addr",
            "127.0.0.1:9100",
        ]);
        let args = parse_args_and_config_from("", &env_args).unwrap();
        let log_file = args.log_file(Path::new("/tmp/tunnel")).unwrap();
        assert_eq!(log_file.rotation, Rotation::HOURLY);
        assert_eq!(log_file.max_files, 4);
        assert_eq!(args.metrics_listen_addr, Some("127.0.0.1:9100".parse().unwrap()));

        let env_args = to_args(&["tunnel-noded", "--log-disable-file"]);
        let args = parse_args_and_config_from("", &env_args).unwrap();
        assert!(args.log_file(Path::new("/tmp/tunnel")).is_none());

        let env_args = to_args(&["tunnel-noded", "--log-rotation", "weekly"]);
        assert!(parse_args_and_config_from("", &env_args).is_err());
        let env_args = to_args(&["tunnel-noded", "--metrics-listen-addr", "localhost"]);
        assert!(parse_args_and_config_from("", &env_args).is_err());
    }

    #[test]
    fn bad_payment_node_test() {
        let short = "20".repeat(31);
        let env_args = to_args(&["tunnel-noded", "--payment-node", &short]);
        assert!(parse_args_and_config_from("", &env_args).is_err());
        let env_args = to_args(&["tunnel-noded", "--payment-node", "not-hex"]);
        assert!(parse_args_and_config_from("", &env_args).is_err());
        let env_args = to_args(&["tunnel-noded", "--min-price-per-packet-route", "-1"]);
        assert!(parse_args_and_config_from("", &env_args).is_err());
    }

    #[test]
    fn clap_with_config_file_test() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "datadir = \"/tmp/tunnel\"\n
            payments-enabled = true\n
            verbosity = 3\n
            min-price-per-packet-route = \"0.1\"\n"
        )
        .unwrap();
        let path = file.path().to_str().unwrap();

        let env_args = to_args(&["tunnel-noded", "--config", path, "--verbosity=1"]);
        let args = parse_args_and_config_from("", &env_args).unwrap();
        assert_eq!(args.datadir.unwrap(), PathBuf::from("/tmp/tunnel"));
        assert!(args.payments_enabled);
        assert_eq!(args.min_price_per_packet_route, Coins::from_nano(100_000_000));
        // command line args override config file
        assert_eq!(args.verbosity, 1);

        let env_args = to_args(&["tunnel-noded", "--verbosity=1", "-f", path]);
        let args = parse_args_and_config_from("", &env_args).unwrap();
        // config file overrides command line because it comes last
        assert_eq!(args.verbosity, 3);

        let env_args = to_args(&["tunnel-noded", "--config", path, "--payments-enabled=false"]);
        let args = parse_args_and_config_from("", &env_args).unwrap();
        assert!(!args.payments_enabled);
    }

    #[test]
    fn missing_config_file_test() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let env_args = to_args(&["tunnel-noded", "--config", missing.to_str().unwrap()]);
        let err = parse_args_and_config_from("", &env_args).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn nested_config_file_test() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("inner.toml");
        fs::write(&inner, "verbosity = 0\n").unwrap();
        let outer = dir.path().join("outer.toml");
        let contents = format!("config = \"{}\"\nlog-filename = \"node.log\"\n", inner.display());
        fs::write(&outer, contents).unwrap();
        let env_args = to_args(&["tunnel-noded", "-f", outer.to_str().unwrap()]);
        let args = parse_args_and_config_from("", &env_args).unwrap();
        assert_eq!(args.verbosity, 0);
        assert_eq!(args.log_filename, "node.log");

        let looping = dir.path().join("loop.toml");
        fs::write(&looping, format!("config = \"{}\"\n", looping.display())).unwrap();
        let env_args = to_args(&["tunnel-noded", "-f", looping.to_str().unwrap()]);
        let err = parse_args_and_config_from("", &env_args).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }
}
