use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::time::Duration;

/// Deployment environment the broker reports at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum RuntimeEnv {
    Development,
    Staging,
    Production,
}

impl fmt::Display for RuntimeEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            RuntimeEnv::Development => "development",
            RuntimeEnv::Staging => "staging",
            RuntimeEnv::Production => "production",
        })
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// A list of full CORS origin URLs that allowed to receive server responses.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = "http://localhost:3000,https://localhost:3000"
    )]
    pub allowed_origins: Vec<String>,

    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 4000)]
    pub port: u16,

    /// Endpoint path on which clients open their SSE subscription
    #[arg(long, env, default_value = "/event-stream")]
    pub stream_path: String,

    /// Endpoint path on which clients report their heartbeat pings
    #[arg(long, env, default_value = "/event-heartbeat")]
    pub heartbeat_path: String,

    /// Endpoint path of the subscriber metadata listing
    #[arg(long, env, default_value = "/event-subscribers")]
    pub subscriptions_path: String,

    /// Seconds without a heartbeat before a subscription is reaped on the
    /// next publish that reaches it
    #[arg(long, env, default_value_t = 30)]
    pub subscription_timeout_secs: u64,

    /// Heartbeat cadence in seconds, advertised to clients on connect
    #[arg(long, env, default_value_t = 10)]
    pub heartbeat_interval_secs: u64,

    /// Whether joins and leaves are broadcast to the affected channel
    #[arg(long, env, default_value_t = true, action = clap::ArgAction::Set)]
    pub notify_channel_of_subscriptions: bool,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the runtime environment to report at startup.
    #[arg(
        short,
        long,
        env,
        value_enum,
        ignore_case = true,
        default_value_t = RuntimeEnv::Development
    )]
    pub runtime_env: RuntimeEnv,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    /// Broker tunables derived from this configuration.
    pub fn broker_options(&self) -> sse::Options {
        sse::Options {
            stream_path: self.stream_path.clone(),
            heartbeat_path: self.heartbeat_path.clone(),
            subscriptions_path: self.subscriptions_path.clone(),
            timeout: Duration::from_secs(self.subscription_timeout_secs),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            notify_channel_of_subscriptions: self.notify_channel_of_subscriptions,
        }
    }
}
