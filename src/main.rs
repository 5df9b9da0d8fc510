use anyhow::{Context, Result};
use clap::Parser;
use nitter_rss_proxy::config::{Config, ProviderConfig, ProviderKind};
use nitter_rss_proxy::feed::{FeedFetcher, OutputFormat};
use nitter_rss_proxy::instances::{InstanceRegistry, StaticRegistry, WikiRegistry};
use nitter_rss_proxy::server::{self, AppState};
use nitter_rss_proxy::util::build_client;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(
    name = "nitter-rss-proxy",
    version,
    about = "Proxies Twitter account feeds from Nitter instances, rewriting links to twitter.com"
)]
struct Args {
    /// TOML config file; flags override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Host:port to listen on
    #[arg(long)]
    addr: Option<String>,

    /// Public base URL of this proxy (used for JSON feed_url)
    #[arg(long, value_name = "URL")]
    base: Option<String>,

    /// Output feed format
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,

    /// Comma-separated Nitter instance base URLs
    #[arg(long, value_name = "URLS")]
    instances: Option<String>,

    /// Where instances come from
    #[arg(long, value_enum)]
    provider: Option<ProviderKind>,

    /// Per-instance timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Whole-request deadline in seconds
    #[arg(long, value_name = "SECS")]
    deadline: Option<u64>,

    /// Rotate the first instance tried on each request
    #[arg(long, value_name = "BOOL")]
    cycle: Option<bool>,

    /// Rewrite Nitter links in item bodies to twitter.com
    #[arg(long, value_name = "BOOL")]
    rewrite: Option<bool>,

    /// Log the authors of each fetched feed's items
    #[arg(long, value_name = "BOOL")]
    debug_authors: Option<bool>,

    /// Proxy for requests to the wiki repository
    #[arg(long, value_name = "URL")]
    repo_proxy: Option<String>,

    /// Write ACCOUNT's feed to stdout and exit instead of serving
    #[arg(long, value_name = "ACCOUNT")]
    user: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(addr) = &self.addr {
            config.addr = addr.clone();
        }
        if let Some(base) = &self.base {
            config.base = Some(base.clone());
        }
        if let Some(format) = self.format {
            config.format = format;
        }
        if let Some(instances) = &self.instances {
            config.instances = instances.clone();
        }
        if let Some(provider) = self.provider {
            config.provider = provider;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(deadline) = self.deadline {
            config.request_deadline_secs = deadline;
        }
        if let Some(cycle) = self.cycle {
            config.cycle = cycle;
        }
        if let Some(rewrite) = self.rewrite {
            config.rewrite = rewrite;
        }
        if let Some(debug_authors) = self.debug_authors {
            config.debug_authors = debug_authors;
        }
        if let Some(proxy) = &self.repo_proxy {
            config.wiki.proxy = Some(proxy.clone());
        }
    }
}

/// Builds the instance registry. For the wiki provider this performs the
/// first directory scrape and, if `background` is set, starts the refresh
/// and re-probe loops.
async fn build_registry(
    provider: ProviderConfig,
    shutdown: &watch::Receiver<bool>,
    background: bool,
) -> Result<Arc<dyn InstanceRegistry>> {
    match provider {
        ProviderConfig::Static(list) => {
            let registry = StaticRegistry::parse(&list).context("Invalid instance list")?;
            Ok(Arc::new(registry))
        }
        ProviderConfig::Wiki(wiki) => {
            let registry =
                Arc::new(WikiRegistry::new(wiki).context("Failed to set up wiki provider")?);
            // Startup continues with an empty list; the refresh loop retries.
            match registry.refresh().await {
                Ok(count) => tracing::info!(instances = count, "Discovered instances"),
                Err(e) => tracing::warn!(error = %e, "Initial instance discovery failed"),
            }
            if background {
                registry.spawn_background(shutdown.clone());
            }
            Ok(registry)
        }
    }
}

/// Flips `tx` to true on Ctrl+C or SIGTERM.
async fn shutdown_signal(tx: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    // No receivers left just means nothing is running.
    let _ = tx.send(true);
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so --user output stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    args.apply(&mut config);

    let fetch_options = config.fetch_options()?;
    let build_options = config.build_options()?;
    let deadline = config.request_deadline()?;
    let provider = config.provider_config()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let registry = build_registry(provider, &shutdown_rx, args.user.is_none()).await?;

    let client = build_client().context("Failed to build HTTP client")?;
    let state = Arc::new(AppState {
        fetcher: FeedFetcher::new(client, registry, fetch_options),
        build: build_options,
        deadline,
    });

    if let Some(user) = &args.user {
        let rendered = server::fetch_account(&state, user)
            .await
            .with_context(|| format!("Failed to get feed for {}", user))?;
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(&rendered.body)
            .context("Failed to write feed")?;
        stdout.flush().context("Failed to write feed")?;
        return Ok(());
    }

    tokio::spawn(shutdown_signal(shutdown_tx));

    server::serve(&config.addr, state, shutdown_rx)
        .await
        .with_context(|| format!("Failed to serve on {}", config.addr))?;

    tracing::info!("Goodbye");
    Ok(())
}
