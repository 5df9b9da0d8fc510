use super::{Instance, InstanceHealth, InstanceRegistry, ProbeResult, Prober};
use crate::util::{read_limited_bytes, validate_instance_url, BodyError};
use futures::stream::{self, StreamExt};
use scraper::{Html, Selector};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

pub const DEFAULT_REPO: &str = "https://github.com/zedeus/nitter";
pub const DEFAULT_ROW_SELECTOR: &str = "#wiki-body table tbody tr";
/// GitHub emoji alias the wiki uses for instances reported as working.
const HEALTHY_ALIAS: &str = "white_check_mark";

const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_DIRECTORY_SIZE: usize = 5 * 1024 * 1024; // 5MB

/// Settings for the wiki-scraping provider.
#[derive(Debug, Clone)]
pub struct WikiConfig {
    /// Repository whose `/wiki/instances` page lists instances.
    pub repo: String,
    /// CSS selector matching one table row per instance.
    pub row_selector: String,
    /// Optional proxy for requests to the repository (not to instances).
    pub proxy: Option<Url>,
    pub refresh_interval: Duration,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub max_concurrent_probes: usize,
    /// Accept loopback/private instance hosts from the directory page.
    pub allow_private_hosts: bool,
}

impl Default for WikiConfig {
    fn default() -> Self {
        Self {
            repo: DEFAULT_REPO.to_string(),
            row_selector: DEFAULT_ROW_SELECTOR.to_string(),
            proxy: None,
            refresh_interval: Duration::from_secs(30 * 60),
            probe_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(10),
            max_concurrent_probes: 30,
            allow_private_hosts: false,
        }
    }
}

/// Errors that can occur while refreshing the instance list.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid row selector {selector:?}: {message}")]
    InvalidSelector { selector: String, message: String },
    #[error("failed building HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("directory returned status {0}")]
    HttpStatus(u16),
    #[error("request timed out")]
    Timeout,
    #[error("failed reading directory: {0}")]
    Body(#[from] BodyError),
    #[error("no instances found in directory")]
    Empty,
}

/// One instance row scraped from the directory page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub url: Url,
    /// Community-reported status from the row's status glyph.
    pub healthy: bool,
}

fn parse_selector(selector: &str) -> Result<Selector, DiscoveryError> {
    Selector::parse(selector).map_err(|e| DiscoveryError::InvalidSelector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

/// Extracts instance candidates from the wiki page HTML.
///
/// Each row matching `row_selector` contributes the first link in its first
/// cell and the `alias` of the first element carrying one in its second cell.
/// Rows lacking either, rows whose URL fails validation, and duplicates are
/// skipped.
pub fn parse_directory(
    html: &str,
    row_selector: &str,
    allow_private_hosts: bool,
) -> Result<Vec<Candidate>, DiscoveryError> {
    let rows = parse_selector(row_selector)?;
    let cells = parse_selector("td")?;
    let links = parse_selector("a[href]")?;
    let glyphs = parse_selector("[alias]")?;

    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for row in document.select(&rows) {
        let mut row_cells = row.select(&cells);
        let (Some(url_cell), Some(status_cell)) = (row_cells.next(), row_cells.next()) else {
            continue;
        };
        let Some(href) = url_cell
            .select(&links)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            continue;
        };
        let Some(alias) = status_cell
            .select(&glyphs)
            .next()
            .and_then(|g| g.value().attr("alias"))
        else {
            continue;
        };

        let url = match validate_instance_url(href, allow_private_hosts) {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!(href = %href, error = %e, "Skipping directory row");
                continue;
            }
        };
        if !seen.insert(url.clone()) {
            continue;
        }
        candidates.push(Candidate {
            url,
            healthy: alias == HEALTHY_ALIAS,
        });
    }

    Ok(candidates)
}

#[derive(Debug, Clone)]
struct InstanceEntry {
    instance: Arc<Instance>,
    /// The directory's status glyph. A dead-marked instance stays inactive
    /// however well it probes.
    reported_healthy: bool,
    health: InstanceHealth,
}

/// Registry built from the Nitter wiki's instance table.
///
/// The snapshot is replaced wholesale on refresh and on every probe merge.
/// Readers clone the `Arc` under a short read lock, so a request sees either
/// the old list or the new one, never a mix. The lock is never held across
/// an `.await`.
pub struct WikiRegistry {
    config: WikiConfig,
    directory_client: reqwest::Client,
    prober: Prober,
    snapshot: RwLock<Arc<Vec<InstanceEntry>>>,
}

impl WikiRegistry {
    /// Creates an empty registry. Call [`WikiRegistry::refresh`] to populate it.
    ///
    /// # Errors
    ///
    /// Fails if the row selector does not parse or the HTTP clients cannot be
    /// built (e.g. an unusable proxy URL).
    pub fn new(config: WikiConfig) -> Result<Self, DiscoveryError> {
        parse_selector(&config.row_selector)?;

        let mut builder = reqwest::Client::builder().timeout(DIRECTORY_TIMEOUT);
        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str()).map_err(DiscoveryError::Client)?;
            builder = builder.proxy(proxy);
        }
        let directory_client = builder.build().map_err(DiscoveryError::Client)?;

        let probe_client = reqwest::Client::builder()
            .timeout(config.probe_timeout)
            .build()
            .map_err(DiscoveryError::Client)?;
        let prober = Prober::new(probe_client, config.probe_timeout);

        Ok(Self {
            config,
            directory_client,
            prober,
            snapshot: RwLock::new(Arc::new(Vec::new())),
        })
    }

    fn directory_url(&self) -> String {
        format!("{}/wiki/instances", self.config.repo.trim_end_matches('/'))
    }

    fn snapshot(&self) -> Arc<Vec<InstanceEntry>> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn replace(&self, entries: Vec<InstanceEntry>) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(entries);
    }

    async fn fetch_directory(&self) -> Result<String, DiscoveryError> {
        let url = self.directory_url();
        let response = tokio::time::timeout(DIRECTORY_TIMEOUT, self.directory_client.get(&url).send())
            .await
            .map_err(|_| DiscoveryError::Timeout)??;

        if !response.status().is_success() {
            return Err(DiscoveryError::HttpStatus(response.status().as_u16()));
        }

        let bytes = read_limited_bytes(response, MAX_DIRECTORY_SIZE).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Re-scrapes the directory, probes every candidate and swaps in the new
    /// list.
    ///
    /// Probes run concurrently, at most `max_concurrent_probes` at a time. A
    /// candidate is alive only if the directory marks it healthy and the probe
    /// succeeds. On error the previous list stays in place.
    ///
    /// Returns the number of instances in the new list.
    pub async fn refresh(&self) -> Result<usize, DiscoveryError> {
        let html = self.fetch_directory().await?;
        let candidates = parse_directory(
            &html,
            &self.config.row_selector,
            self.config.allow_private_hosts,
        )?;
        if candidates.is_empty() {
            return Err(DiscoveryError::Empty);
        }

        let prober = &self.prober;
        // `buffered` keeps directory order while bounding concurrency.
        let entries: Vec<InstanceEntry> = stream::iter(candidates)
            .map(|candidate| async move {
                let instance = Arc::new(Instance::new(candidate.url));
                let probe = prober.probe(&instance).await;
                InstanceEntry {
                    instance,
                    reported_healthy: candidate.healthy,
                    health: InstanceHealth {
                        alive: candidate.healthy && probe.ok,
                        latency_ms: probe.latency_ms,
                    },
                }
            })
            .buffered(self.config.max_concurrent_probes.max(1))
            .collect()
            .await;

        let total = entries.len();
        let alive = entries.iter().filter(|e| e.health.alive).count();
        self.replace(entries);
        tracing::info!(total = total, alive = alive, "Instance list refreshed");
        Ok(total)
    }

    /// Probes every instance in the current list and records the results.
    pub async fn reprobe(&self) {
        let current = self.snapshot();
        if current.is_empty() {
            return;
        }

        let prober = &self.prober;
        let results: Vec<(Arc<Instance>, ProbeResult)> =
            stream::iter(current.iter().map(|e| Arc::clone(&e.instance)).collect::<Vec<_>>())
                .map(|instance| async move {
                    let result = prober.probe(&instance).await;
                    (instance, result)
                })
                .buffer_unordered(self.config.max_concurrent_probes.max(1))
                .collect()
                .await;

        self.merge_probe_results(&results);
    }

    /// Applies probe results to whatever list is current. Instances that were
    /// dropped by a refresh in the meantime are ignored.
    fn merge_probe_results(&self, results: &[(Arc<Instance>, ProbeResult)]) {
        let by_url: HashMap<&Url, &ProbeResult> =
            results.iter().map(|(i, r)| (i.url(), r)).collect();

        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<InstanceEntry> = (**guard).clone();
        for entry in &mut entries {
            if let Some(result) = by_url.get(entry.instance.url()) {
                entry.health = if result.ok {
                    InstanceHealth {
                        alive: entry.reported_healthy,
                        latency_ms: result.latency_ms,
                    }
                } else {
                    InstanceHealth {
                        alive: false,
                        ..entry.health
                    }
                };
            }
        }
        *guard = Arc::new(entries);
    }

    /// Starts the periodic refresh and re-probe loops.
    ///
    /// Both loops sleep first (the caller is expected to have run an initial
    /// [`WikiRegistry::refresh`]) and exit once `shutdown` turns true or its
    /// sender is dropped.
    pub fn spawn_background(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> [JoinHandle<()>; 2] {
        let registry = Arc::clone(self);
        let refresh = tokio::spawn(run_every(
            self.config.refresh_interval,
            shutdown.clone(),
            move || {
                let registry = Arc::clone(&registry);
                async move {
                    if let Err(e) = registry.refresh().await {
                        tracing::warn!(error = %e, "Instance list refresh failed, keeping previous list");
                    }
                }
            },
        ));

        let registry = Arc::clone(self);
        let reprobe = tokio::spawn(run_every(self.config.probe_interval, shutdown, move || {
            let registry = Arc::clone(&registry);
            async move { registry.reprobe().await }
        }));

        [refresh, reprobe]
    }
}

impl InstanceRegistry for WikiRegistry {
    fn all_instances(&self) -> Vec<Arc<Instance>> {
        self.snapshot()
            .iter()
            .map(|e| Arc::clone(&e.instance))
            .collect()
    }

    /// Alive instances, fastest first. Ties keep directory order.
    fn active_instances(&self) -> Vec<Arc<Instance>> {
        let snapshot = self.snapshot();
        let mut alive: Vec<&InstanceEntry> = snapshot.iter().filter(|e| e.health.alive).collect();
        alive.sort_by_key(|e| e.health.latency_ms);
        alive.into_iter().map(|e| Arc::clone(&e.instance)).collect()
    }
}

/// Runs `tick` every `period` until `shutdown` flips to true.
async fn run_every<F, Fut>(period: Duration, mut shutdown: watch::Receiver<bool>, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }
        if *shutdown.borrow() {
            break;
        }
        tick().await;
    }
    tracing::debug!("Background instance loop stopped");
}
