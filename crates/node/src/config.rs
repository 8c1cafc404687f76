//! Command line and `zend.conf` settings.
//!
//! Flags on the command line win over keys in the config file. The file is
//! read from `--conf` or `<data-dir>/zend.conf`; a missing file is fine.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use zend_chainstate::checkqueue::DEFAULT_CHECK_QUEUE_DEPTH;
use zend_consensus::{chain_params, ChainParams, Network};
use zend_log::{Category, Format, Level, LogConfig};

use crate::admission::{
    MempoolPolicy, DEFAULT_LIMIT_FREE_RELAY_KB_PER_MINUTE, DEFAULT_MIN_RELAY_FEE_PER_KB,
};
use crate::proof_queue::{ProofQueueConfig, DEFAULT_PROOF_BATCH_DELAY_MS, DEFAULT_PROOF_BATCH_SIZE};

const DEFAULT_DATA_DIR: &str = "data";
const CONF_FILE_NAME: &str = "zend.conf";
const DEFAULT_MEMPOOL_MAX_MB: u64 = 300;
const MAX_SCRIPT_THREADS: usize = 16;
const DEFAULT_STATUS_INTERVAL_SECS: u64 = 60;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backend {
    Memory,
    Fjall,
}

impl Backend {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "memory" => Some(Self::Memory),
            "fjall" => Some(Self::Fjall),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub backend: Backend,
    pub data_dir: PathBuf,
    pub conf_path: PathBuf,
    pub network: Network,
    pub log: LogConfig,
    /// Script check worker threads; zero checks inline.
    pub script_threads: usize,
    pub check_queue_depth: usize,
    pub min_relay_fee_per_kb: i64,
    pub limit_free_relay_kb_per_minute: u64,
    pub mempool_max_bytes: usize,
    pub require_standard: bool,
    pub async_proofs: bool,
    pub proof_batch_size: usize,
    pub proof_batch_delay_ms: u64,
    /// Regtest only.
    pub sc_coins_maturity: Option<i32>,
    pub import: Vec<PathBuf>,
    /// Zero disables the periodic status line.
    pub status_interval_secs: u64,
}

impl Config {
    pub fn chain_params(&self) -> ChainParams {
        let mut params = chain_params(self.network);
        if let Some(maturity) = self.sc_coins_maturity {
            params.consensus.sc_coins_maturity = maturity;
        }
        params
    }

    pub fn mempool_policy(&self) -> MempoolPolicy {
        let mut policy = MempoolPolicy::standard(self.min_relay_fee_per_kb, self.require_standard);
        policy.limit_free_relay_kb_per_minute = self.limit_free_relay_kb_per_minute;
        policy
    }

    pub fn proof_queue(&self) -> ProofQueueConfig {
        ProofQueueConfig {
            batch_size: self.proof_batch_size.max(1),
            max_delay: Duration::from_millis(self.proof_batch_delay_ms),
        }
    }
}

pub enum CliAction {
    Run(Config),
    PrintHelp,
    PrintVersion,
}

pub fn parse_args() -> Result<CliAction, String> {
    parse_args_from(std::env::args().skip(1))
}

pub fn parse_args_from<I>(raw_args: I) -> Result<CliAction, String>
where
    I: IntoIterator<Item = String>,
{
    let mut backend = Backend::Fjall;
    let mut backend_set = false;
    let mut data_dir: Option<PathBuf> = None;
    let mut conf_path: Option<PathBuf> = None;
    let mut network = Network::Mainnet;
    let mut network_set = false;
    let mut log_level = Level::Info;
    let mut log_level_set = false;
    let mut log_format = Format::Text;
    let mut log_format_set = false;
    let mut log_timestamps = true;
    let mut categories: Vec<Category> = Vec::new();
    let mut script_threads: usize = 0;
    let mut script_threads_set = false;
    let mut check_queue_depth: usize = DEFAULT_CHECK_QUEUE_DEPTH;
    let mut check_queue_depth_set = false;
    let mut min_relay_fee_per_kb: i64 = DEFAULT_MIN_RELAY_FEE_PER_KB;
    let mut min_relay_fee_per_kb_set = false;
    let mut limit_free_relay_kb_per_minute: u64 = DEFAULT_LIMIT_FREE_RELAY_KB_PER_MINUTE;
    let mut limit_free_relay_set = false;
    let mut mempool_max_mb: u64 = DEFAULT_MEMPOOL_MAX_MB;
    let mut mempool_max_mb_set = false;
    let mut require_standard: Option<bool> = None;
    let mut async_proofs = false;
    let mut async_proofs_set = false;
    let mut proof_batch_size: usize = DEFAULT_PROOF_BATCH_SIZE;
    let mut proof_batch_size_set = false;
    let mut proof_batch_delay_ms: u64 = DEFAULT_PROOF_BATCH_DELAY_MS;
    let mut proof_batch_delay_set = false;
    let mut sc_coins_maturity: Option<i32> = None;
    let mut import: Vec<PathBuf> = Vec::new();
    let mut status_interval_secs: u64 = DEFAULT_STATUS_INTERVAL_SECS;

    let mut args = raw_args.into_iter().peekable();
    if let Some(first) = args.peek().map(|value| value.as_str()) {
        match first {
            "help" => return Ok(CliAction::PrintHelp),
            "version" => return Ok(CliAction::PrintVersion),
            _ => {}
        }
    }

    while let Some(arg) = args.next() {
        let mut value_for = |flag: &str| {
            args.next()
                .ok_or_else(|| format!("missing value for {flag}\n{}", usage()))
        };
        match arg.as_str() {
            "--help" | "-h" => return Ok(CliAction::PrintHelp),
            "--version" | "-V" => return Ok(CliAction::PrintVersion),
            "--backend" => {
                let value = value_for("--backend")?;
                backend = Backend::parse(&value)
                    .ok_or_else(|| format!("invalid backend '{value}'\n{}", usage()))?;
                backend_set = true;
            }
            "--data-dir" => data_dir = Some(PathBuf::from(value_for("--data-dir")?)),
            "--conf" => conf_path = Some(PathBuf::from(value_for("--conf")?)),
            "--network" => {
                let value = value_for("--network")?;
                network = Network::parse(&value).ok_or_else(|| {
                    format!("invalid network '{value}' (expected main|test|regtest)\n{}", usage())
                })?;
                network_set = true;
            }
            "--regtest" => {
                network = Network::Regtest;
                network_set = true;
            }
            "--testnet" => {
                network = Network::Testnet;
                network_set = true;
            }
            "--log-level" => {
                let value = value_for("--log-level")?;
                log_level = Level::parse(&value)
                    .ok_or_else(|| format!("invalid log level '{value}'\n{}", usage()))?;
                log_level_set = true;
            }
            "--log-format" => {
                let value = value_for("--log-format")?;
                log_format = Format::parse(&value)
                    .ok_or_else(|| format!("invalid log format '{value}'\n{}", usage()))?;
                log_format_set = true;
            }
            "--no-log-timestamps" => log_timestamps = false,
            "--debug" => {
                let value = value_for("--debug")?;
                push_categories(&mut categories, &value)?;
            }
            "--par" => {
                script_threads = parse_number(&value_for("--par")?, "--par")?;
                script_threads_set = true;
            }
            "--check-queue" => {
                check_queue_depth = parse_number(&value_for("--check-queue")?, "--check-queue")?;
                check_queue_depth_set = true;
            }
            "--min-relay-fee" => {
                min_relay_fee_per_kb = parse_fee_rate_per_kb(&value_for("--min-relay-fee")?)?;
                min_relay_fee_per_kb_set = true;
            }
            "--limit-free-relay" => {
                limit_free_relay_kb_per_minute =
                    parse_number(&value_for("--limit-free-relay")?, "--limit-free-relay")?;
                limit_free_relay_set = true;
            }
            "--mempool-max-mb" => {
                mempool_max_mb = parse_number(&value_for("--mempool-max-mb")?, "--mempool-max-mb")?;
                mempool_max_mb_set = true;
            }
            "--require-standard" => require_standard = Some(true),
            "--accept-nonstandard" => require_standard = Some(false),
            "--async-proofs" => {
                async_proofs = true;
                async_proofs_set = true;
            }
            "--proof-batch-size" => {
                proof_batch_size =
                    parse_number(&value_for("--proof-batch-size")?, "--proof-batch-size")?;
                proof_batch_size_set = true;
            }
            "--proof-batch-delay-ms" => {
                proof_batch_delay_ms =
                    parse_number(&value_for("--proof-batch-delay-ms")?, "--proof-batch-delay-ms")?;
                proof_batch_delay_set = true;
            }
            "--sc-coins-maturity" => {
                sc_coins_maturity = Some(parse_number(
                    &value_for("--sc-coins-maturity")?,
                    "--sc-coins-maturity",
                )?);
            }
            "--import" => import.push(PathBuf::from(value_for("--import")?)),
            "--status-interval" => {
                status_interval_secs =
                    parse_number(&value_for("--status-interval")?, "--status-interval")?;
            }
            other => return Err(format!("unknown argument '{other}'\n{}", usage())),
        }
    }

    let data_dir = data_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    let conf_file = conf_path
        .clone()
        .unwrap_or_else(|| data_dir.join(CONF_FILE_NAME));
    if let Some(conf) = load_zend_conf(&conf_file)? {
        let last = |key: &str| conf.get(key).and_then(|values| values.last());
        let conf_bool = |key: &str| -> Result<Option<bool>, String> {
            match last(key) {
                Some(raw) => parse_conf_bool(raw).map(Some).ok_or_else(|| {
                    format!("invalid {key} value '{raw}' in {}", conf_file.display())
                }),
                None => Ok(None),
            }
        };

        if !network_set {
            if conf_bool("regtest")? == Some(true) {
                network = Network::Regtest;
            } else if conf_bool("testnet")? == Some(true) {
                network = Network::Testnet;
            }
        }
        if !backend_set {
            if let Some(raw) = last("backend") {
                backend = Backend::parse(raw)
                    .ok_or_else(|| format!("invalid backend '{raw}' in {}", conf_file.display()))?;
            }
        }
        if !log_level_set {
            if let Some(raw) = last("loglevel") {
                log_level = Level::parse(raw).ok_or_else(|| {
                    format!("invalid loglevel '{raw}' in {}", conf_file.display())
                })?;
            }
        }
        if !log_format_set {
            if let Some(raw) = last("logformat") {
                log_format = Format::parse(raw).ok_or_else(|| {
                    format!("invalid logformat '{raw}' in {}", conf_file.display())
                })?;
            }
        }
        if let Some(values) = conf.get("debug") {
            for value in values {
                push_categories(&mut categories, value)?;
            }
        }
        if !script_threads_set {
            if let Some(raw) = last("par") {
                script_threads = parse_number(raw, "par")?;
            }
        }
        if !check_queue_depth_set {
            if let Some(raw) = last("checkqueue") {
                check_queue_depth = parse_number(raw, "checkqueue")?;
            }
        }
        if !min_relay_fee_per_kb_set {
            if let Some(raw) = last("minrelaytxfee") {
                min_relay_fee_per_kb = parse_fee_rate_per_kb(raw)?;
            }
        }
        if !limit_free_relay_set {
            if let Some(raw) = last("limitfreerelay") {
                limit_free_relay_kb_per_minute = parse_number(raw, "limitfreerelay")?;
            }
        }
        if !mempool_max_mb_set {
            if let Some(raw) = last("maxmempool") {
                mempool_max_mb = parse_number(raw, "maxmempool")?;
            }
        }
        if require_standard.is_none() {
            if let Some(accept) = conf_bool("acceptnonstdtxn")? {
                require_standard = Some(!accept);
            }
        }
        if !async_proofs_set {
            if let Some(value) = conf_bool("asyncproofs")? {
                async_proofs = value;
            }
        }
        if !proof_batch_size_set {
            if let Some(raw) = last("scproofbatchsize") {
                proof_batch_size = parse_number(raw, "scproofbatchsize")?;
            }
        }
        if !proof_batch_delay_set {
            if let Some(raw) = last("scproofbatchdelayms") {
                proof_batch_delay_ms = parse_number(raw, "scproofbatchdelayms")?;
            }
        }
        if sc_coins_maturity.is_none() {
            if let Some(raw) = last("sccoinsmaturity") {
                sc_coins_maturity = Some(parse_number(raw, "sccoinsmaturity")?);
            }
        }
        if let Some(values) = conf.get("loadblock") {
            import.extend(values.iter().map(PathBuf::from));
        }
    }

    if sc_coins_maturity.is_some() && network != Network::Regtest {
        return Err("--sc-coins-maturity is only allowed on regtest".to_string());
    }
    if sc_coins_maturity.is_some_and(|maturity| maturity < 0) {
        return Err("--sc-coins-maturity must be >= 0".to_string());
    }

    let require_standard =
        require_standard.unwrap_or_else(|| chain_params(network).require_standard);
    let mempool_max_bytes = usize::try_from(mb_to_bytes(mempool_max_mb)).unwrap_or(usize::MAX);

    Ok(CliAction::Run(Config {
        backend,
        data_dir,
        conf_path: conf_file,
        network,
        log: LogConfig {
            level: log_level,
            format: log_format,
            timestamps: log_timestamps,
            categories,
        },
        script_threads: script_threads.min(MAX_SCRIPT_THREADS),
        check_queue_depth: check_queue_depth.max(1),
        min_relay_fee_per_kb,
        limit_free_relay_kb_per_minute,
        mempool_max_bytes,
        require_standard,
        async_proofs,
        proof_batch_size: proof_batch_size.max(1),
        proof_batch_delay_ms,
        sc_coins_maturity,
        import,
        status_interval_secs,
    }))
}

/// `key=value` lines; `#` and `;` start comments and a bare key means `1`.
/// Keys are case-insensitive and may repeat.
fn load_zend_conf(path: &Path) -> Result<Option<HashMap<String, Vec<String>>>, String> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(format!("failed to read {}: {err}", path.display())),
    };

    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for raw_line in contents.lines() {
        let mut line = raw_line.trim();
        if let Some(idx) = line.find(['#', ';']) {
            line = &line[..idx];
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, "1"),
        };
        if key.is_empty() {
            continue;
        }
        out.entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
    Ok(Some(out))
}

fn parse_conf_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.is_empty() {
        return Some(true);
    }
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn push_categories(categories: &mut Vec<Category>, value: &str) -> Result<(), String> {
    for raw in value.split(',') {
        let raw = raw.trim();
        if raw.is_empty() || raw == "1" || raw == "all" {
            for category in Category::ALL {
                if !categories.contains(&category) {
                    categories.push(category);
                }
            }
            continue;
        }
        let category =
            Category::parse(raw).ok_or_else(|| format!("unknown debug category '{raw}'"))?;
        if !categories.contains(&category) {
            categories.push(category);
        }
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, String> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| format!("invalid value '{value}' for {name}"))
}

fn parse_fee_rate_per_kb(value: &str) -> Result<i64, String> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| format!("invalid fee rate '{value}'"))
        .and_then(|amount| {
            if amount < 0 {
                return Err("fee rate must be >= 0".to_string());
            }
            Ok(amount)
        })
}

fn mb_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(1024 * 1024)
}

pub fn usage() -> String {
    [
        "Usage:",
        "  zend [options]",
        "  zend <command>",
        "",
        "Commands:",
        "  help     Print this help and exit",
        "  version  Print version and exit",
        "",
        "Options:",
        "  --help, -h  Print this help and exit",
        "  --version, -V  Print version and exit",
        "  --backend  Storage backend to use: memory|fjall (default: fjall)",
        "  --data-dir  Base data directory (default: ./data)",
        "  --conf  Config file path (default: <data-dir>/zend.conf)",
        "  --network  main|test|regtest (default: main)",
        "  --regtest, --testnet  Shorthands for --network",
        "  --log-level  error|warn|info|debug|trace (default: info)",
        "  --log-format  text|json (default: text)",
        "  --no-log-timestamps  Omit timestamps from text logs",
        "  --debug  Enable a debug category: sc|cert|mempool|reorg|bench|all (repeatable)",
        "  --par  Script verification threads, 0 checks inline (default: 0)",
        "  --check-queue  Script checks handed to the workers per batch (default: 128)",
        "  --min-relay-fee  Minimum relay fee rate in zatoshis/kB (default: 100)",
        "  --limit-free-relay  Free transaction budget in kB/minute (default: 15)",
        "  --mempool-max-mb  Mempool byte cap (default: 300)",
        "  --require-standard  Reject non-standard transactions",
        "  --accept-nonstandard  Relay non-standard transactions",
        "  --async-proofs  Verify mempool proofs in deferred batches",
        "  --proof-batch-size  Entries per deferred proof batch (default: 10)",
        "  --proof-batch-delay-ms  Longest wait before a partial batch runs (default: 5000)",
        "  --sc-coins-maturity  Forward transfer maturity in blocks, regtest only",
        "  --import  Load length-prefixed blocks from a file (repeatable)",
        "  --status-interval  Seconds between status lines, 0 disables (default: 60)",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn run_config(values: &[&str]) -> Config {
        match parse_args_from(args(values)).expect("parse") {
            CliAction::Run(config) => config,
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn defaults_follow_the_network() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data_dir = dir.path().to_string_lossy().to_string();
        let config = run_config(&["--data-dir", &data_dir]);
        assert_eq!(config.network, Network::Mainnet);
        assert!(config.require_standard);
        assert_eq!(config.limit_free_relay_kb_per_minute, 15);
        assert_eq!(config.mempool_max_bytes, 300 * 1024 * 1024);
        assert_eq!(config.conf_path, dir.path().join("zend.conf"));

        let config = run_config(&["--data-dir", &data_dir, "--network", "regtest"]);
        assert!(!config.require_standard);
    }

    #[test]
    fn command_line_wins_over_the_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("zend.conf"),
            "# node settings\nregtest\npar=4 ; inline comment\nminrelaytxfee=250\n\
             debug=sc\ndebug=mempool\nasyncproofs=1\nsccoinsmaturity=3\nloadblock=a.dat\n",
        )
        .expect("write conf");
        let data_dir = dir.path().to_string_lossy().to_string();
        let config = run_config(&["--data-dir", &data_dir, "--par", "2", "--import", "b.dat"]);

        assert_eq!(config.network, Network::Regtest);
        assert_eq!(config.script_threads, 2);
        assert_eq!(config.min_relay_fee_per_kb, 250);
        assert_eq!(config.log.categories, vec![Category::Sc, Category::Mempool]);
        assert!(config.async_proofs);
        assert_eq!(config.chain_params().consensus.sc_coins_maturity, 3);
        assert_eq!(
            config.import,
            vec![PathBuf::from("b.dat"), PathBuf::from("a.dat")]
        );
    }

    #[test]
    fn coin_maturity_override_is_regtest_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data_dir = dir.path().to_string_lossy().to_string();
        let err = parse_args_from(args(&["--data-dir", &data_dir, "--sc-coins-maturity", "1"]))
            .err()
            .expect("rejected");
        assert!(err.contains("regtest"));
    }

    #[test]
    fn rejects_unknown_flags_and_bad_values() {
        assert!(parse_args_from(args(&["--bogus"])).is_err());
        assert!(parse_args_from(args(&["--par", "many"])).is_err());
        assert!(parse_args_from(args(&["--debug", "wallet"])).is_err());
        assert!(parse_args_from(args(&["--min-relay-fee", "-1"])).is_err());
        assert!(matches!(
            parse_args_from(args(&["version"])),
            Ok(CliAction::PrintVersion)
        ));
        assert!(matches!(
            parse_args_from(args(&["--help"])),
            Ok(CliAction::PrintHelp)
        ));
    }

    #[test]
    fn conf_parser_handles_comments_and_bare_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("zend.conf");
        fs::write(&path, "; header\nTestNet\nmaxmempool = 10 # mb\n\n=ignored\n").expect("write");
        let conf = load_zend_conf(&path).expect("read").expect("present");
        assert_eq!(conf.get("testnet"), Some(&vec!["1".to_string()]));
        assert_eq!(conf.get("maxmempool"), Some(&vec!["10".to_string()]));
        assert_eq!(conf.len(), 2);
        assert!(load_zend_conf(&dir.path().join("missing.conf"))
            .expect("missing is fine")
            .is_none());
    }
}
