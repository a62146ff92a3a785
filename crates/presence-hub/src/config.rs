use clap::Parser;
use std::time::Duration;

const DEFAULT_ADDR: &str = "127.0.0.1:4100";
const DEFAULT_LOG_DIR: &str = ".presence/logs";

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: String,
    pub debug: bool,
    pub log_level: Option<String>,
    pub ping_interval: Duration,
    pub write_timeout: Duration,
    pub queue_capacity: usize,
    /// Cap on a single inbound frame; larger frames drop the socket.
    pub max_message_bytes: usize,
    pub announce_rejoins: bool,
    pub log_dir: String,
}

#[derive(Parser, Debug)]
#[command(name = "presence-hub")]
pub struct Args {
    #[arg(long)]
    addr: Option<String>,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value_t = 10)]
    ping_interval: u64,
    #[arg(long, default_value_t = 2)]
    write_timeout: u64,
    #[arg(long, default_value_t = 256)]
    queue_capacity: usize,
    #[arg(long, default_value_t = 64 * 1024)]
    max_message_bytes: usize,
    /// Tell every other connection when an identity re-joins.
    #[arg(long, default_value_t = false)]
    announce_rejoins: bool,
    /// Directory for `presence-hub.log`; an empty value keeps logs on stdout only.
    #[arg(long)]
    log_dir: Option<String>,
}

impl Config {
    pub fn load() -> Self {
        Self::from_args(Args::parse(), |key| std::env::var(key).ok())
    }

    /// Flags win over the environment, the environment over defaults.
    pub fn from_args<E>(args: Args, env: E) -> Self
    where
        E: Fn(&str) -> Option<String>,
    {
        let addr = non_empty(args.addr)
            .or_else(|| non_empty(env("PRESENCE_HUB_ADDR")))
            .unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let log_dir = args
            .log_dir
            .or_else(|| env("PRESENCE_LOG_DIR"))
            .unwrap_or_else(|| DEFAULT_LOG_DIR.to_string());
        Self {
            addr,
            debug: args.debug || truthy(env("PRESENCE_HUB_DEBUG")),
            log_level: non_empty(env("PRESENCE_LOG_LEVEL")),
            ping_interval: Duration::from_secs(args.ping_interval.max(1)),
            write_timeout: Duration::from_secs(args.write_timeout.max(1)),
            queue_capacity: args.queue_capacity.max(1),
            max_message_bytes: args.max_message_bytes,
            announce_rejoins: args.announce_rejoins || truthy(env("PRESENCE_ANNOUNCE_REJOINS")),
            log_dir,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn truthy(value: Option<String>) -> bool {
    value.is_some_and(|value| {
        ["1", "true", "yes", "on"]
            .iter()
            .any(|word| value.trim().eq_ignore_ascii_case(word))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(argv: &[&str], vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        let mut full = vec!["presence-hub"];
        full.extend_from_slice(argv);
        Config::from_args(Args::parse_from(full), |key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_flags_or_env() {
        let config = load(&[], &[]);
        assert_eq!(config.addr, DEFAULT_ADDR);
        assert_eq!(config.log_dir, DEFAULT_LOG_DIR);
        assert_eq!(config.ping_interval, Duration::from_secs(10));
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.max_message_bytes, 64 * 1024);
        assert!(!config.debug);
        assert!(!config.announce_rejoins);
        assert_eq!(config.log_level, None);
    }

    #[test]
    fn flags_win_over_environment() {
        let config = load(
            &["--addr", "0.0.0.0:9000", "--log-dir", "/tmp/presence"],
            &[
                ("PRESENCE_HUB_ADDR", "127.0.0.1:1"),
                ("PRESENCE_LOG_DIR", "/var/log/presence"),
            ],
        );
        assert_eq!(config.addr, "0.0.0.0:9000");
        assert_eq!(config.log_dir, "/tmp/presence");
    }

    #[test]
    fn environment_fills_missing_flags() {
        let config = load(
            &["--queue-capacity", "0"],
            &[
                ("PRESENCE_HUB_ADDR", "10.0.0.1:4100"),
                ("PRESENCE_HUB_DEBUG", "Yes"),
                ("PRESENCE_ANNOUNCE_REJOINS", "1"),
                ("PRESENCE_LOG_LEVEL", "warn"),
                ("PRESENCE_LOG_DIR", ""),
            ],
        );
        assert_eq!(config.addr, "10.0.0.1:4100");
        assert!(config.debug);
        assert!(config.announce_rejoins);
        assert_eq!(config.log_level.as_deref(), Some("warn"));
        assert_eq!(config.log_dir, "");
        assert_eq!(config.queue_capacity, 1);
    }

    #[test]
    fn blank_values_fall_through() {
        let config = load(&["--addr", " "], &[("PRESENCE_HUB_ADDR", "10.0.0.2:1")]);
        assert_eq!(config.addr, "10.0.0.2:1");
        let config = load(&[], &[("PRESENCE_HUB_ADDR", "  "), ("PRESENCE_HUB_DEBUG", "nope")]);
        assert_eq!(config.addr, DEFAULT_ADDR);
        assert!(!config.debug);
    }
}
