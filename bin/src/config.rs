//! daemon configs

pub mod cli {
    //! Parse from either cli or env var

    /// Default external api
    pub static DEFAULT_EXTERNAL_API: &str = "[::]:3333";
    /// tokio worker thread name
    pub static DEFAULT_THREAD_NAME: &str = "booking-lock-worker";
    /// the default path to config
    pub static DEFAULT_CONFIG_PATH: &str = "/etc/booking-lock/config.yaml";
    /// default instance id
    pub const DEFAULT_INSTANCE_ID: &str = "booking-lockd";
    /// default log level. Can use this argument or LOCK_LOG env var
    pub const DEFAULT_LOCK_LOG: &str = "info";
    /// log as "json", "pretty" or "standard" (unstructured)
    pub const DEFAULT_LOG_FORMAT: &str = "standard";

    use std::{net::SocketAddr, path::PathBuf};

    pub use clap::Parser;

    #[derive(Parser, Debug, Clone, PartialEq, Eq)]
    #[clap(author, name = "booking-lockd", bin_name = "booking-lockd", about, long_about = None)]
    /// parses from cli & environment var. booking-lockd will load `.env` in the working dir as well
    pub struct Config {
        /// path to the lock config
        #[clap(
            short,
            long,
            value_parser,
            env,
            default_value = DEFAULT_CONFIG_PATH
        )]
        pub config_path: PathBuf,
        /// the address the health/metrics api listens on
        #[clap(long, env, value_parser, default_value = DEFAULT_EXTERNAL_API)]
        pub external_api: SocketAddr,
        /// number of tokio worker threads, defaults to the number of logical CPUs
        #[clap(long, env, value_parser)]
        pub threads: Option<usize>,
        /// Worker thread name
        #[clap(long, env, value_parser, default_value = DEFAULT_THREAD_NAME)]
        pub thread_name: String,
        /// ID of this instance, attached to logs
        #[clap(long, env, value_parser, default_value = DEFAULT_INSTANCE_ID)]
        pub instance_id: String,
        /// set the log level. All valid RUST_LOG arguments are accepted
        #[clap(long, env, value_parser, default_value = DEFAULT_LOCK_LOG)]
        pub lock_log: String,
        /// log output format: standard, json or pretty
        #[clap(long, env, value_parser, default_value = DEFAULT_LOG_FORMAT)]
        pub log_format: String,
        /// run a single cleanup sweep, print its stats as JSON and exit
        #[clap(long, env, action)]
        pub sweep_once: bool,
    }
}

pub mod trace {
    //! tracing configuration
    use anyhow::Result;
    use tracing_subscriber::{
        filter::EnvFilter,
        fmt::{
            self,
            format::{Format, PrettyFields},
        },
        prelude::__tracing_subscriber_SubscriberExt,
        util::SubscriberInitExt,
    };

    /// Configuration for the global subscriber
    #[derive(Debug)]
    pub struct Config {
        /// formatting to apply to logs
        pub log_frmt: String,
    }

    impl Config {
        /// install the global subscriber
        pub fn parse(lock_log: &str, log_frmt: &str) -> Result<Self> {
            // Log level comes from LOCK_LOG
            let filter = EnvFilter::try_new(lock_log)
                .or_else(|_| EnvFilter::try_new("info"))?
                .add_directive("hyper=off".parse()?)
                .add_directive("async_nats=warn".parse()?);

            match log_frmt {
                "json" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().json())
                        .init();
                }
                "pretty" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(
                            fmt::layer()
                                .event_format(
                                    Format::default().pretty().with_source_location(false),
                                )
                                .fmt_fields(PrettyFields::new()),
                        )
                        .init();
                }
                _ => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer())
                        .init();
                }
            }

            Ok(Self {
                log_frmt: log_frmt.to_owned(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::cli::{Config, Parser};

    #[test]
    fn test_cli_defaults() {
        let cfg = Config::try_parse_from(["booking-lockd"]).unwrap();
        assert_eq!(cfg.external_api.port(), 3333);
        assert_eq!(cfg.threads, None);
        assert_eq!(cfg.log_format, "standard");
        assert!(!cfg.sweep_once);
    }

    #[test]
    fn test_cli_flags() {
        let cfg = Config::try_parse_from([
            "booking-lockd",
            "--config-path",
            "/tmp/lock.yaml",
            "--threads",
            "2",
            "--instance-id",
            "lock-a",
            "--log-format",
            "json",
            "--sweep-once",
        ])
        .unwrap();
        assert_eq!(cfg.config_path.to_str(), Some("/tmp/lock.yaml"));
        assert_eq!(cfg.threads, Some(2));
        assert_eq!(cfg.instance_id, "lock-a");
        assert_eq!(cfg.log_format, "json");
        assert!(cfg.sweep_once);
    }
}
