use crate::account::AccountPath;
use crate::instances::{Instance, InstanceRegistry};
use crate::util::{read_limited_bytes, BodyError};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that end a fetch. Per-instance failures are logged, not returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The registry had nothing to offer
    #[error("no instances available")]
    NoInstances,
    /// Every instance was tried once and none produced a usable feed
    #[error("all {attempts} instance(s) failed")]
    AllInstancesFailed { attempts: usize },
}

/// Why a single instance was skipped.
#[derive(Debug, Error)]
enum AttemptError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server returned status {0}")]
    HttpStatus(u16),
    #[error("request timed out")]
    Timeout,
    #[error(transparent)]
    Body(#[from] BodyError),
    #[error("{0}")]
    Handler(String),
}

#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    /// Start each request at the instance after the previous request's start.
    pub cycle: bool,
    /// Bound on each individual instance attempt.
    pub timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            cycle: true,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
pub struct FetchOutcome<T> {
    pub value: T,
    /// The instance that served the feed.
    pub instance: Arc<Instance>,
    /// Instances tried and skipped before `instance` succeeded.
    pub failed_attempts: usize,
}

/// Fetches account feeds, failing over across the registry's instances.
pub struct FeedFetcher {
    client: reqwest::Client,
    registry: Arc<dyn InstanceRegistry>,
    options: FetchOptions,
    /// Index of the next request's first instance. Reduced modulo the
    /// current list length on use, so a shrinking list cannot strand it.
    cursor: Mutex<usize>,
}

impl FeedFetcher {
    pub fn new(
        client: reqwest::Client,
        registry: Arc<dyn InstanceRegistry>,
        options: FetchOptions,
    ) -> Self {
        Self {
            client,
            registry,
            options,
            cursor: Mutex::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<dyn InstanceRegistry> {
        &self.registry
    }

    /// Picks the starting index for a list of `len` instances and, when
    /// cycling, advances the cursor past it.
    fn next_start(&self, len: usize) -> usize {
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let start = *cursor % len;
        if self.options.cycle {
            *cursor = (start + 1) % len;
        }
        start
    }

    /// One attempt: the request and the body read share a single
    /// `options.timeout` budget.
    async fn download(&self, url: &url::Url) -> Result<Vec<u8>, AttemptError> {
        tokio::time::timeout(self.options.timeout, self.get_body(url))
            .await
            .map_err(|_| AttemptError::Timeout)?
    }

    async fn get_body(&self, url: &url::Url) -> Result<Vec<u8>, AttemptError> {
        let response = self.client.get(url.as_str()).send().await?;
        if !response.status().is_success() {
            return Err(AttemptError::HttpStatus(response.status().as_u16()));
        }
        Ok(read_limited_bytes(response, MAX_FEED_SIZE).await?)
    }

    /// Fetches `account`'s feed, handing each downloaded body to `handle`.
    ///
    /// Instances come from the registry's active list, or from its full list
    /// when nothing is active. Starting at the cursor, each instance is tried
    /// at most once, in order, wrapping around the end of the list. A
    /// transport error, timeout, non-2xx status, oversized body or `handle`
    /// error moves on to the next instance. The first value `handle` accepts
    /// is returned.
    ///
    /// Dropping the returned future cancels the attempt in flight.
    ///
    /// # Errors
    ///
    /// - [`FetchError::NoInstances`] if the registry is empty
    /// - [`FetchError::AllInstancesFailed`] if no instance succeeded
    pub async fn fetch<T, E, F>(
        &self,
        account: &AccountPath,
        mut handle: F,
    ) -> Result<FetchOutcome<T>, FetchError>
    where
        E: fmt::Display,
        F: FnMut(&Instance, Vec<u8>) -> Result<T, E>,
    {
        let mut instances = self.registry.active_instances();
        if instances.is_empty() {
            instances = self.registry.all_instances();
        }
        if instances.is_empty() {
            return Err(FetchError::NoInstances);
        }

        let len = instances.len();
        let start = self.next_start(len);
        let mut failed_attempts = 0;

        for i in 0..len {
            let instance = &instances[(start + i) % len];
            let url = instance.feed_url(account);
            tracing::debug!(account = %account, url = %url, "Fetching feed");

            let attempt = match self.download(&url).await {
                Ok(bytes) => handle(instance, bytes).map_err(|e| AttemptError::Handler(e.to_string())),
                Err(e) => Err(e),
            };

            match attempt {
                Ok(value) => {
                    tracing::info!(
                        account = %account,
                        instance = %instance,
                        failed_attempts = failed_attempts,
                        "Fetched feed"
                    );
                    return Ok(FetchOutcome {
                        value,
                        instance: Arc::clone(instance),
                        failed_attempts,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        account = %account,
                        instance = %instance,
                        error = %e,
                        "Failed fetching feed"
                    );
                    failed_attempts += 1;
                }
            }
        }

        Err(FetchError::AllInstancesFailed {
            attempts: failed_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instances::StaticRegistry;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn account(s: &str) -> AccountPath {
        AccountPath::extract(s).unwrap()
    }

    fn fetcher(list: &str, cycle: bool) -> FeedFetcher {
        let registry = StaticRegistry::parse(list).unwrap();
        FeedFetcher::new(
            reqwest::Client::new(),
            Arc::new(registry),
            FetchOptions {
                cycle,
                timeout: Duration::from_secs(2),
            },
        )
    }

    fn accept(_: &Instance, bytes: Vec<u8>) -> Result<String, String> {
        String::from_utf8(bytes).map_err(|e| e.to_string())
    }

    /// A registry whose every list is empty.
    struct EmptyRegistry;

    impl InstanceRegistry for EmptyRegistry {
        fn all_instances(&self) -> Vec<Arc<Instance>> {
            Vec::new()
        }
        fn active_instances(&self) -> Vec<Arc<Instance>> {
            Vec::new()
        }
    }

    /// Nothing active, everything known.
    struct NoneActive(Vec<Arc<Instance>>);

    impl InstanceRegistry for NoneActive {
        fn all_instances(&self) -> Vec<Arc<Instance>> {
            self.0.clone()
        }
        fn active_instances(&self) -> Vec<Arc<Instance>> {
            Vec::new()
        }
    }

    async fn serving(body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/NASA/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    async fn failing(status: u16) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(status))
            .expect(1)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_first_instance_succeeds() {
        let server = serving("<rss/>").await;
        let fetcher = fetcher(&server.uri(), true);
        let outcome = fetcher.fetch(&account("/NASA"), accept).await.unwrap();
        assert_eq!(outcome.value, "<rss/>");
        assert_eq!(outcome.failed_attempts, 0);
    }

    #[tokio::test]
    async fn test_failover_to_third_instance() {
        let a = failing(500).await;
        let b = failing(404).await;
        let c = serving("<rss/>").await;
        let fetcher = fetcher(&format!("{},{},{}", a.uri(), b.uri(), c.uri()), true);

        let outcome = fetcher.fetch(&account("/NASA"), accept).await.unwrap();
        assert_eq!(outcome.failed_attempts, 2);
        assert_eq!(outcome.instance.url().as_str(), format!("{}/", c.uri()));
    }

    #[tokio::test]
    async fn test_all_instances_fail() {
        let a = failing(500).await;
        let b = failing(502).await;
        let fetcher = fetcher(&format!("{},{}", a.uri(), b.uri()), true);

        let err = fetcher.fetch(&account("/NASA"), accept).await.unwrap_err();
        assert_eq!(err, FetchError::AllInstancesFailed { attempts: 2 });
    }

    #[tokio::test]
    async fn test_handler_error_fails_over() {
        let a = serving("garbage").await;
        let b = serving("<rss/>").await;
        let fetcher = fetcher(&format!("{},{}", a.uri(), b.uri()), false);

        let outcome = fetcher
            .fetch(&account("/NASA"), |_: &Instance, bytes: Vec<u8>| {
                if bytes.starts_with(b"<rss") {
                    Ok(())
                } else {
                    Err("not a feed")
                }
            })
            .await
            .unwrap();
        assert_eq!(outcome.failed_attempts, 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout() {
        let slow = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&slow)
            .await;
        let fast = serving("<rss/>").await;

        let registry = StaticRegistry::parse(&format!("{},{}", slow.uri(), fast.uri())).unwrap();
        let fetcher = FeedFetcher::new(
            reqwest::Client::new(),
            Arc::new(registry),
            FetchOptions {
                cycle: false,
                timeout: Duration::from_millis(200),
            },
        );
        let outcome = fetcher.fetch(&account("/NASA"), accept).await.unwrap();
        assert_eq!(outcome.failed_attempts, 1);
    }

    /// Serves one response whose headers and body each arrive after `delay`.
    async fn trickling(delay: Duration) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            tokio::time::sleep(delay).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\n")
                .await;
            let _ = socket.flush().await;
            tokio::time::sleep(delay).await;
            let _ = socket.write_all(b"<rss/>").await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_attempt_timeout_covers_body() {
        // Headers and body each fit the budget alone, but not together.
        let uri = trickling(Duration::from_millis(700)).await;
        let registry = StaticRegistry::parse(&uri).unwrap();
        let fetcher = FeedFetcher::new(
            reqwest::Client::new(),
            Arc::new(registry),
            FetchOptions {
                cycle: false,
                timeout: Duration::from_secs(1),
            },
        );

        let started = std::time::Instant::now();
        let err = fetcher.fetch(&account("/NASA"), accept).await.unwrap_err();
        assert_eq!(err, FetchError::AllInstancesFailed { attempts: 1 });
        assert!(started.elapsed() < Duration::from_millis(1300));
    }

    #[tokio::test]
    async fn test_no_instances() {
        let fetcher = FeedFetcher::new(
            reqwest::Client::new(),
            Arc::new(EmptyRegistry),
            FetchOptions::default(),
        );
        let err = fetcher.fetch(&account("/NASA"), accept).await.unwrap_err();
        assert_eq!(err, FetchError::NoInstances);
    }

    #[tokio::test]
    async fn test_falls_back_to_all_instances() {
        let server = serving("<rss/>").await;
        let instance = Arc::new(Instance::new(url::Url::parse(&server.uri()).unwrap()));
        let fetcher = FeedFetcher::new(
            reqwest::Client::new(),
            Arc::new(NoneActive(vec![instance])),
            FetchOptions::default(),
        );
        assert!(fetcher.fetch(&account("/NASA"), accept).await.is_ok());
    }

    #[test]
    fn test_cursor_cycles() {
        let fetcher = fetcher("https://a.example,https://b.example,https://c.example", true);
        let starts: Vec<usize> = (0..5).map(|_| fetcher.next_start(3)).collect();
        assert_eq!(starts, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_cursor_fixed_without_cycle() {
        let fetcher = fetcher("https://a.example,https://b.example", false);
        assert_eq!(fetcher.next_start(2), 0);
        assert_eq!(fetcher.next_start(2), 0);
    }

    #[test]
    fn test_cursor_survives_shrinking_list() {
        let fetcher = fetcher("https://a.example", true);
        for _ in 0..4 {
            fetcher.next_start(5);
        }
        let start = fetcher.next_start(2);
        assert!(start < 2);
        assert!(fetcher.next_start(2) < 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        /// Each instance is tried exactly once when every attempt fails, and
        /// the attempts form one rotation of the list.
        #[test]
        fn failover_visits_each_instance_once(len in 1usize..6, skips in 0usize..8, cycle in any::<bool>()) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let server = MockServer::start().await;
                Mock::given(method("GET"))
                    .respond_with(ResponseTemplate::new(200).set_body_string("x"))
                    .mount(&server)
                    .await;

                let list: Vec<String> = (0..len).map(|i| format!("{}/m{}", server.uri(), i)).collect();
                let fetcher = fetcher(&list.join(","), cycle);
                for _ in 0..skips {
                    fetcher.next_start(len);
                }

                let mut visited: Vec<String> = Vec::new();
                let result = fetcher
                    .fetch(&account("/NASA"), |instance: &Instance, _bytes: Vec<u8>| {
                        visited.push(instance.url().path().to_string());
                        Err::<(), _>("rejected")
                    })
                    .await;

                prop_assert_eq!(result.unwrap_err(), FetchError::AllInstancesFailed { attempts: len });
                prop_assert_eq!(visited.len(), len);

                let first: usize = visited[0].trim_start_matches("/m").parse().unwrap();
                for (i, path) in visited.iter().enumerate() {
                    prop_assert_eq!(path, &format!("/m{}", (first + i) % len));
                }
                Ok(())
            })?;
        }
    }
}
