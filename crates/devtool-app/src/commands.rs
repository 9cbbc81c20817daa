//! Subcommand implementations.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};

use devtool_core::{filter_events, EventBuffer, NetworkEvent, NetworkFilters, ProxyStatus};
use devtool_proxy::{
    wait_until_ready, Backoff, CertificateInstaller, ControlClient, FilterCache, LiveStream,
    ProxySupervisor, StatusCache, StreamState, StreamStatus,
};

use crate::cli::{Command, ConfigAction, FiltersAction, RunArgs, SessionsAction};
use crate::config::AppConfig;
use crate::render;

/// Runs one subcommand to completion.
///
/// `config_path` is the `--config` file, if one was given.
pub async fn execute(
    config: AppConfig,
    config_path: Option<&Path>,
    command: Command,
) -> anyhow::Result<()> {
    match command {
        Command::Run(args) => run(config, args).await,
        Command::Status => status(&config).await,
        Command::Enable => set_enabled(&config, true).await,
        Command::Disable => set_enabled(&config, false).await,
        Command::Filters { action } => filters(&config, action).await,
        Command::Sessions { action } => sessions(&config, action).await,
        Command::InstallCert { yes } => install_cert(&config, yes).await,
        Command::Config { action } => config_command(&config, config_path, action),
    }
}

fn client(config: &AppConfig) -> anyhow::Result<ControlClient> {
    config
        .control_client()
        .context("Failed to create control-plane client")
}

async fn status(config: &AppConfig) -> anyhow::Result<()> {
    let status = client(config)?
        .fetch_status()
        .await
        .with_context(|| {
            format!(
                "Proxy at {}:{} is not reachable",
                config.host, config.api_port
            )
        })?;
    println!("{}", render::status_line(&status));
    Ok(())
}

async fn set_enabled(config: &AppConfig, enabled: bool) -> anyhow::Result<()> {
    let cache = StatusCache::new(client(config)?);
    let status = cache
        .set_enabled(enabled)
        .await
        .context("Failed to change interception")?;
    println!("{}", render::status_line(&status));
    Ok(())
}

async fn filters(config: &AppConfig, action: FiltersAction) -> anyhow::Result<()> {
    let cache = FilterCache::new(client(config)?);

    let filters = match action {
        FiltersAction::Show => cache.refresh().await.context("Failed to fetch filters")?,
        FiltersAction::Set(args) => cache
            .update(args.to_filters())
            .await
            .context("Failed to update filters")?,
        FiltersAction::Clear => cache.clear().await.context("Failed to clear filters")?,
    };

    println!("{}", render::filters_text(&filters));
    Ok(())
}

async fn sessions(config: &AppConfig, action: SessionsAction) -> anyhow::Result<()> {
    let client = client(config)?;

    match action {
        SessionsAction::List {
            all,
            limit,
            verbose,
        } => {
            let filters = if all {
                NetworkFilters::default()
            } else {
                client.fetch_filters().await.context("Failed to fetch filters")?
            };

            let events = client
                .fetch_sessions()
                .await
                .context("Failed to fetch sessions")?;

            let buffer = newest_sessions(&events, &filters, limit);
            for event in buffer.iter() {
                if verbose {
                    println!("{}", render::event_detail(event));
                } else {
                    println!("{}", render::event_line(event));
                }
            }
            println!("{} of {} sessions shown", buffer.len(), events.len());
        }
        SessionsAction::Clear => {
            client
                .clear_sessions()
                .await
                .context("Failed to clear sessions")?;
            println!("Sessions cleared");
        }
    }

    Ok(())
}

/// Sessions passing `filters`, newest first, keeping at most `limit`.
fn newest_sessions(
    events: &[NetworkEvent],
    filters: &NetworkFilters,
    limit: Option<usize>,
) -> EventBuffer {
    let mut buffer = match limit {
        Some(limit) => EventBuffer::with_capacity(limit),
        None => EventBuffer::new(),
    };
    buffer.extend_oldest_first(filter_events(events, filters).cloned());
    buffer
}

async fn install_cert(config: &AppConfig, yes: bool) -> anyhow::Result<()> {
    if !yes && !confirm("Trust the DevTool proxy CA certificate for this user?")? {
        println!("Aborted");
        return Ok(());
    }

    let path = trust_proxy_ca(config)
        .await
        .context("Failed to install the proxy certificate")?;

    println!("Certificate installed from {}", path.display());
    Ok(())
}

async fn trust_proxy_ca(config: &AppConfig) -> devtool_proxy::Result<PathBuf> {
    let installer = CertificateInstaller::new(&config.host, config.api_port)?
        .with_timeout(config.request_timeout())?;
    Ok(installer.install().await?)
}

fn config_command(
    config: &AppConfig,
    path: Option<&Path>,
    action: ConfigAction,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        ConfigAction::Save => {
            let written = config
                .save_to(path)
                .context("Failed to save configuration")?;
            println!("Configuration saved to {}", written.display());
        }
    }
    Ok(())
}

fn confirm(question: &str) -> anyhow::Result<bool> {
    print!("{} [y/N] ", question);
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

async fn run(mut config: AppConfig, args: RunArgs) -> anyhow::Result<()> {
    if let Some(dir) = &args.resource_dir {
        config.resource_dir = Some(dir.clone());
    }

    let supervisor = ProxySupervisor::new(config.supervisor_config());
    let result = stream_until_interrupted(&config, &args, &supervisor).await;

    if !args.attach {
        supervisor.stop().await;
        if let Some(exit) = supervisor.last_exit() {
            tracing::info!(pid = exit.pid, code = ?exit.code, "Proxy stopped");
        }
    }

    result
}

/// Launches the proxy unless attaching, waits for its control API and opens
/// the live stream.
async fn bring_up(
    config: &AppConfig,
    args: &RunArgs,
    supervisor: &ProxySupervisor,
    client: &ControlClient,
    statuses: &StatusCache,
    stream: &LiveStream,
) -> devtool_proxy::Result<ProxyStatus> {
    if !args.attach {
        let process = supervisor.start()?;
        tracing::info!(pid = process.pid, "Proxy launched");
    }

    let ready = wait_until_ready(client, &Backoff::startup()).await?;
    let status = if args.enable && !ready.enabled {
        statuses.set_enabled(true).await?
    } else {
        statuses.refresh().await?
    };

    stream.connect(&config.host, config.api_port)?;
    Ok(status)
}

async fn stream_until_interrupted(
    config: &AppConfig,
    args: &RunArgs,
    supervisor: &ProxySupervisor,
) -> anyhow::Result<()> {
    let client = client(config)?;
    let statuses = Arc::new(StatusCache::new(client.clone()));
    let filters = Arc::new(FilterCache::new(client.clone()));

    let stream = LiveStream::default();
    let mut events = stream.subscribe();
    let mut stream_status = stream.status();

    let status = bring_up(config, args, supervisor, &client, &statuses, &stream)
        .await
        .context("Failed to start live capture")?;
    println!("{}", render::status_line(&status));

    let mut pollers = vec![tokio::spawn(Arc::clone(&statuses).start_polling())];
    if !args.all {
        if let Err(e) = filters.refresh().await {
            tracing::warn!("Showing unfiltered traffic, could not fetch filters: {}", e);
        }
        pollers.push(tokio::spawn(Arc::clone(&filters).start_polling()));
    }

    let mut tally = LiveTally::default();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => break Ok(()),
            event = events.recv() => {
                let Some(event) = event else { break Ok(()) };
                let snapshot = (!args.all).then(|| filters.snapshot());
                if let Some(line) = tally.accept(&event, snapshot.as_ref()) {
                    println!("{}", line);
                }
            }
            changed = stream_status.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = stream_status.borrow_and_update().clone();
                report_stream_status(&current);
                if current.state == StreamState::Disconnected {
                    break Err(anyhow!(
                        "Live stream stopped: {}",
                        current.last_error.unwrap_or_else(|| "unknown error".to_string())
                    ));
                }
            }
        }
    };

    for poller in pollers {
        poller.abort();
    }
    stream.disconnect().await;
    println!("{} events shown", tally.shown);
    outcome
}

/// Renders live events that pass the filters and counts them.
#[derive(Debug, Default)]
struct LiveTally {
    shown: usize,
}

impl LiveTally {
    /// Returns the line to print, or `None` if `filters` reject the event.
    fn accept(&mut self, event: &NetworkEvent, filters: Option<&NetworkFilters>) -> Option<String> {
        if filters.is_some_and(|f| !f.matches(event)) {
            return None;
        }
        self.shown += 1;
        Some(render::event_line(event))
    }
}

fn report_stream_status(status: &StreamStatus) {
    match &status.state {
        StreamState::Connected => tracing::info!("Receiving live traffic"),
        StreamState::Backoff { attempt, delay } => tracing::warn!(
            attempt,
            ?delay,
            "Live stream lost ({}), reconnecting",
            status.last_error.as_deref().unwrap_or("unknown error")
        ),
        StreamState::Connecting | StreamState::Disconnected => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn event(method: &str, url: &str) -> NetworkEvent {
        let text = format!(
            r#"{{"type":"request","request":{{"method":"{}","url":"{}"}}}}"#,
            method, url
        );
        NetworkEvent::from_wire(&text).unwrap()
    }

    #[test]
    fn yes_answers() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("no"));
        assert!(!is_yes("yep"));
    }

    #[test]
    fn tally_counts_every_printed_event() {
        let mut tally = LiveTally::default();
        let e = event("GET", "http://a.com/");
        for _ in 0..1500 {
            assert!(tally.accept(&e, None).is_some());
        }
        assert_eq!(tally.shown, 1500);
    }

    #[test]
    fn tally_skips_filtered_events() {
        let filters = NetworkFilters {
            exclude_methods: vec!["OPTIONS".into()],
            ..Default::default()
        };
        let mut tally = LiveTally::default();

        assert!(tally.accept(&event("OPTIONS", "http://a.com/"), Some(&filters)).is_none());
        let line = tally.accept(&event("GET", "http://a.com/"), Some(&filters));
        assert!(line.is_some_and(|l| l.contains("GET http://a.com/")));
        assert_eq!(tally.shown, 1);
    }

    #[test]
    fn newest_sessions_limits_after_filtering() {
        let history = vec![
            event("GET", "http://a.com/1"),
            event("GET", "http://a.com/2"),
            event("POST", "http://a.com/3"),
            event("GET", "http://a.com/4"),
        ];
        let filters = NetworkFilters {
            include_methods: vec!["GET".into()],
            ..Default::default()
        };

        let buffer = newest_sessions(&history, &filters, Some(2));
        let urls: Vec<_> = buffer.iter().filter_map(|e| e.url()).collect();
        assert_eq!(urls, vec!["http://a.com/4", "http://a.com/2"]);

        let all = newest_sessions(&history, &NetworkFilters::default(), None);
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn config_save_writes_given_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("devtool.json");
        let config = AppConfig {
            api_port: 9100,
            ..AppConfig::default()
        };

        config_command(&config, Some(&path), ConfigAction::Save).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }
}
