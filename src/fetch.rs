use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, warn};

use crate::error::KiraError;
use crate::graphdb::RetryPolicy;

/// Transport used by sources to pull upstream files.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, source_id: &str, url: &str, destination: &Path) -> Result<(), KiraError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    retry: RetryPolicy,
}

/// Outcome of one failed attempt; `Transient` is retried while budget remains.
enum AttemptError {
    Transient(KiraError),
    Fatal(KiraError),
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-bg/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::Filesystem(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| KiraError::Fetch {
                source_id: "http".to_string(),
                message: err.to_string(),
            })?;
        Ok(Self {
            client,
            retry: RetryPolicy {
                max_attempts: 4,
                base_delay: Duration::from_millis(500),
            },
        })
    }

    /// Same attempt budget and backoff as store writes.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    // One request, body streamed into a truncated destination.
    fn attempt(&self, source_id: &str, url: &str, destination: &Path) -> Result<(), AttemptError> {
        let fetch_error = |err: &dyn std::fmt::Display| KiraError::Fetch {
            source_id: source_id.to_string(),
            message: format!("{url}: {err}"),
        };

        let mut response = match self.client.get(url).send() {
            Ok(response) => response,
            Err(err) if is_retryable_error(&err) => {
                return Err(AttemptError::Transient(fetch_error(&err)));
            }
            Err(err) => return Err(AttemptError::Fatal(fetch_error(&err))),
        };

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| format!("request to {url} failed"));
            let err = KiraError::FetchStatus {
                source_id: source_id.to_string(),
                status,
                message,
            };
            return Err(if is_retryable_status(status) {
                AttemptError::Transient(err)
            } else {
                AttemptError::Fatal(err)
            });
        }

        let mut file = File::create(destination)
            .map_err(|err| AttemptError::Fatal(KiraError::Filesystem(err.to_string())))?;
        io::copy(&mut response, &mut file)
            .map_err(|err| AttemptError::Transient(fetch_error(&err)))?;
        Ok(())
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, source_id: &str, url: &str, destination: &Path) -> Result<(), KiraError> {
        debug!(source = source_id, url, "fetching");
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            match self.attempt(source_id, url, destination) {
                Ok(()) => return Ok(()),
                Err(AttemptError::Transient(err)) if attempt < max_attempts => {
                    warn!(source = source_id, url, attempt, error = %err, "retrying download");
                    thread::sleep(self.retry.delay(attempt));
                    attempt += 1;
                }
                Err(AttemptError::Transient(err) | AttemptError::Fatal(err)) => return Err(err),
            }
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;

    use super::*;

    /// Serves one canned response per connection, then stops accepting.
    fn serve(responses: Vec<String>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/file.txt", listener.local_addr().unwrap());
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();
        thread::spawn(move || {
            for response in responses {
                let Ok((mut stream, _)) = listener.accept() else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.flush();
            }
        });
        (url, connections)
    }

    fn ok(body: &str, declared_len: usize) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {declared_len}\r\nConnection: close\r\n\r\n{body}"
        )
    }

    fn fetcher(max_attempts: u32) -> HttpFetcher {
        HttpFetcher::new(Duration::from_secs(5))
            .unwrap()
            .with_retry(RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(1),
            })
    }

    #[test]
    fn truncated_body_is_retried() {
        let (url, connections) = serve(vec![ok("hello", 100), ok("hello world", 11)]);
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("file.txt");

        fetcher(3).fetch("gtex", &url, &destination).unwrap();

        assert_eq!(connections.load(Ordering::SeqCst), 2);
        assert_eq!(fs::read_to_string(&destination).unwrap(), "hello world");
    }

    #[test]
    fn unavailable_then_ok_is_retried() {
        let unavailable =
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 4\r\nConnection: close\r\n\r\nbusy"
                .to_string();
        let (url, connections) = serve(vec![unavailable, ok("names", 5)]);
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("file.txt");

        fetcher(3).fetch("reactome", &url, &destination).unwrap();

        assert_eq!(connections.load(Ordering::SeqCst), 2);
        assert_eq!(fs::read_to_string(&destination).unwrap(), "names");
    }

    #[test]
    fn attempts_are_bounded_by_max_attempts() {
        let unavailable =
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 4\r\nConnection: close\r\n\r\nbusy"
                .to_string();
        let (url, connections) = serve(vec![unavailable.clone(), unavailable.clone(), unavailable]);
        let dir = tempfile::tempdir().unwrap();

        let err = fetcher(2)
            .fetch("reactome", &url, &dir.path().join("file.txt"))
            .unwrap_err();

        assert_matches!(err, KiraError::FetchStatus { status: 503, .. });
        assert_eq!(connections.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn not_found_is_not_retried() {
        let missing =
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string();
        let (url, connections) = serve(vec![missing, ok("late", 4)]);
        let dir = tempfile::tempdir().unwrap();

        let err = fetcher(3)
            .fetch("gtex", &url, &dir.path().join("file.txt"))
            .unwrap_err();

        assert_matches!(err, KiraError::FetchStatus { status: 404, .. });
        assert_eq!(connections.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(429));
        assert!(!is_retryable_status(404));
    }
}
