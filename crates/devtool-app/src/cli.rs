//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use devtool_core::NetworkFilters;

use crate::config::AppConfig;

/// DevTool - inspect HTTP(S) traffic from mobile devices through a local proxy
#[derive(Parser, Debug)]
#[command(name = "devtool", version, about)]
pub struct Args {
    /// Enable debug logging (also logs to the console)
    #[arg(long, global = true)]
    pub debug: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Path to the configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Control-plane host
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Control API port
    #[arg(long, global = true)]
    pub api_port: Option<u16>,

    /// Intercepting proxy port
    #[arg(long, global = true)]
    pub proxy_port: Option<u16>,

    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    /// Applies command-line overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.api_port {
            config.api_port = port;
        }
        if let Some(port) = self.proxy_port {
            config.proxy_port = port;
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the proxy and print live traffic until Ctrl-C
    ///
    /// Filter changes made elsewhere (for example `devtool filters set`) are
    /// picked up within a few seconds.
    Run(RunArgs),

    /// Show whether the proxy is intercepting
    Status,

    /// Enable interception
    Enable,

    /// Disable interception
    Disable,

    /// Show or change the proxy's filters
    Filters {
        #[command(subcommand)]
        action: FiltersAction,
    },

    /// List or clear captured sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },

    /// Trust the proxy's CA certificate for the current user
    InstallCert {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Show or save the effective configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(ClapArgs, Debug, Default)]
pub struct RunArgs {
    /// Use an already running proxy instead of launching one
    #[arg(long)]
    pub attach: bool,

    /// Enable interception once the proxy is ready
    #[arg(long)]
    pub enable: bool,

    /// Print every event, ignoring the proxy's filters
    #[arg(long)]
    pub all: bool,

    /// Directory containing the proxy binary
    #[arg(long)]
    pub resource_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum FiltersAction {
    /// Print the current filters
    Show,
    /// Replace the filters; omitted lists become empty
    Set(FilterArgs),
    /// Remove every filter
    Clear,
}

/// Comma-separated filter lists.
#[derive(ClapArgs, Debug, Default)]
pub struct FilterArgs {
    #[arg(long, value_name = "HOSTS")]
    pub include_hosts: Option<String>,
    #[arg(long, value_name = "HOSTS")]
    pub exclude_hosts: Option<String>,
    #[arg(long, value_name = "METHODS")]
    pub include_methods: Option<String>,
    #[arg(long, value_name = "METHODS")]
    pub exclude_methods: Option<String>,
    #[arg(long, value_name = "CODES")]
    pub include_status_codes: Option<String>,
    #[arg(long, value_name = "CODES")]
    pub exclude_status_codes: Option<String>,
    #[arg(long, value_name = "SUBSTRINGS")]
    pub include_url_contains: Option<String>,
    #[arg(long, value_name = "SUBSTRINGS")]
    pub exclude_url_contains: Option<String>,
}

impl FilterArgs {
    /// Builds a complete filter snapshot.
    pub fn to_filters(&self) -> NetworkFilters {
        let list = |value: &Option<String>| {
            value
                .as_deref()
                .map(NetworkFilters::parse_list)
                .unwrap_or_default()
        };
        let codes = |value: &Option<String>| {
            value
                .as_deref()
                .map(NetworkFilters::parse_status_codes)
                .unwrap_or_default()
        };

        NetworkFilters {
            include_hosts: list(&self.include_hosts),
            exclude_hosts: list(&self.exclude_hosts),
            include_methods: list(&self.include_methods),
            exclude_methods: list(&self.exclude_methods),
            include_status_codes: codes(&self.include_status_codes),
            exclude_status_codes: codes(&self.exclude_status_codes),
            include_url_contains: list(&self.include_url_contains),
            exclude_url_contains: list(&self.exclude_url_contains),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum SessionsAction {
    /// Print persisted events, newest first
    List {
        /// Ignore the proxy's filters
        #[arg(long)]
        all: bool,

        /// Print at most this many events (the newest ones)
        #[arg(long)]
        limit: Option<usize>,

        /// Also print headers and bodies
        #[arg(long, short)]
        verbose: bool,
    },
    /// Delete persisted events
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the configuration in effect, flags included, as JSON
    Show,
    /// Write the configuration in effect to the config file
    Save,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(args).unwrap()
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn run_defaults() {
        let args = parse(&["devtool", "run"]);
        assert!(!args.debug);
        assert_eq!(args.log_level, "info");
        match args.command {
            Command::Run(run) => {
                assert!(!run.attach);
                assert!(!run.enable);
                assert!(!run.all);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let args = parse(&["devtool", "status", "--host", "10.0.0.5", "--api-port", "7777"]);
        assert!(matches!(args.command, Command::Status));

        let mut config = AppConfig::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.api_port, 7777);
        assert_eq!(config.proxy_port, 8888);
    }

    #[test]
    fn filters_set_parses_lists() {
        let args = parse(&[
            "devtool",
            "filters",
            "set",
            "--include-hosts",
            "api.example.com, cdn.example.com,,",
            "--exclude-status-codes",
            "304,abc, 404",
        ]);

        let Command::Filters {
            action: FiltersAction::Set(set),
        } = args.command
        else {
            panic!("expected filters set");
        };

        let filters = set.to_filters();
        assert_eq!(
            filters.include_hosts,
            vec!["api.example.com".to_string(), "cdn.example.com".to_string()]
        );
        assert_eq!(filters.exclude_status_codes, vec![304, 404]);
        assert!(filters.include_methods.is_empty());
    }

    #[test]
    fn empty_filter_args_are_empty_filters() {
        assert!(FilterArgs::default().to_filters().is_empty());
    }

    #[test]
    fn sessions_list_flags() {
        let args = parse(&["devtool", "sessions", "list", "--all", "--limit", "5", "-v"]);
        match args.command {
            Command::Sessions {
                action: SessionsAction::List { all, limit, verbose },
            } => {
                assert!(all);
                assert_eq!(limit, Some(5));
                assert!(verbose);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn install_cert_yes_flag() {
        let args = parse(&["devtool", "install-cert", "--yes"]);
        assert!(matches!(args.command, Command::InstallCert { yes: true }));
    }

    #[test]
    fn config_save_with_path() {
        let args = parse(&["devtool", "config", "save", "--config", "/tmp/devtool.json"]);
        assert!(matches!(
            args.command,
            Command::Config {
                action: ConfigAction::Save
            }
        ));
        assert_eq!(args.config, Some(PathBuf::from("/tmp/devtool.json")));
    }

    #[test]
    fn missing_subcommand_is_error() {
        assert!(Args::try_parse_from(["devtool"]).is_err());
    }
}
