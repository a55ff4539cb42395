//! Reporter lifecycle: event intake, periodic upload, and shutdown flush.
//!
//! The reporter owns the counter table and ties the pipeline together. A
//! periodic task fires once per configured period (first fire after one full
//! period, not at start) and runs build-then-upload on the blocking pool so
//! the network call never occupies an async worker. The host's shutdown hook
//! calls [`UsageReporter::flush`] for one final synchronous upload.

use crate::anonymizer;
use crate::config::ReporterConfig;
use crate::counter::{CounterTable, OperationInfo, UsageSubject};
use crate::report::{self, SiteResolver};
use crate::uploader;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Periodic uploader of anonymous usage statistics.
pub struct UsageReporter {
    table: Arc<CounterTable>,
    resolver: Arc<dyn SiteResolver + Send + Sync>,
    config: ReporterConfig,
    /// Held while the periodic task runs; dropping it stops the task.
    stop_tx: Option<mpsc::Sender<()>>,
}

impl UsageReporter {
    pub fn new(resolver: Arc<dyn SiteResolver + Send + Sync>, config: ReporterConfig) -> Self {
        Self {
            table: Arc::new(CounterTable::new()),
            resolver,
            config,
            stop_tx: None,
        }
    }

    /// The counter table fed by this reporter.
    pub fn table(&self) -> Arc<CounterTable> {
        self.table.clone()
    }

    /// Records one completed operation.
    pub fn record(&self, subject: &dyn UsageSubject) {
        self.table.increment(subject);
    }

    /// Consumes operation-executed events from the host, incrementing the
    /// table in delivery order. The task ends when all senders are dropped.
    pub fn attach_events(&self, mut events: mpsc::Receiver<OperationInfo>) -> JoinHandle<()> {
        let table = self.table.clone();
        tokio::spawn(async move {
            while let Some(operation) = events.recv().await {
                table.increment(&operation);
            }
        })
    }

    /// Starts the periodic reporting task. The first upload happens one full
    /// period after start. Starting an already-running reporter is a no-op.
    pub fn start(&mut self) {
        if self.stop_tx.is_some() {
            return;
        }
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        self.stop_tx = Some(stop_tx);

        let table = self.table.clone();
        let resolver = self.resolver.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            let period = Duration::from_secs(config.period_secs.max(1));
            let mut interval = tokio::time::interval(period);
            // the first tick completes immediately; consume it so the first
            // upload waits one full period
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        run_cycle(table.clone(), resolver.clone(), config.clone()).await;
                    }
                    _ = stop_rx.recv() => break,
                }
            }
        });
    }

    /// True while the periodic task is scheduled.
    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }

    /// Cancels the periodic task. Idempotent.
    pub fn stop(&mut self) {
        self.stop_tx = None;
    }

    /// Builds and uploads a report right now, synchronously. Called once
    /// more by the host just before shutdown to flush pending counts.
    pub fn flush(&self) {
        upload_once(&self.table, self.resolver.as_ref(), &self.config);
    }
}

async fn run_cycle(
    table: Arc<CounterTable>,
    resolver: Arc<dyn SiteResolver + Send + Sync>,
    config: ReporterConfig,
) {
    let cycle = tokio::task::spawn_blocking(move || {
        upload_once(&table, resolver.as_ref(), &config);
    });
    if let Err(e) = cycle.await {
        tracing::error!("Usage reporting cycle failed: {}", e);
    }
}

/// One build-then-upload pass over the current counter snapshot.
fn upload_once(table: &CounterTable, resolver: &dyn SiteResolver, config: &ReporterConfig) {
    if !config.opt_in {
        return;
    }
    let Some(url) = config.server_url.as_deref() else {
        tracing::debug!("No usage server configured; skipping upload");
        return;
    };
    let snapshot = table.snapshot();
    let document = report::build_report(resolver, snapshot.values());
    let user = anonymizer::anonymized_user();
    uploader::upload(&document, &user, url);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Site;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::path::Path;
    use std::thread;

    /// Resolver that owns everything under one official site.
    struct SingleSiteResolver {
        site: Site,
    }

    impl SiteResolver for SingleSiteResolver {
        fn resolve(&self, _path: &Path) -> Option<Site> {
            Some(self.site.clone())
        }
    }

    fn imagej_resolver() -> Arc<SingleSiteResolver> {
        Arc::new(SingleSiteResolver {
            site: Site {
                name: "ImageJ".to_string(),
                url: "http://x/".to_string(),
                official: true,
            },
        })
    }

    /// Accepts one request and returns its raw text after replying 200.
    fn one_shot_server() -> (String, std::sync::mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut data = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = stream.read(&mut buf).unwrap();
                assert!(n > 0);
                data.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&data).into_owned();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text
                        .lines()
                        .find_map(|line| {
                            let (key, value) = line.split_once(':')?;
                            key.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if data.len() >= header_end + 4 + content_length {
                        let body = r#"{"message":"thanks"}"#;
                        let reply = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        );
                        stream.write_all(reply.as_bytes()).unwrap();
                        tx.send(text).unwrap();
                        break;
                    }
                }
            }
        });
        (format!("http://{}", addr), rx)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_events_flow_into_one_site_group() {
        let reporter = UsageReporter::new(imagej_resolver(), ReporterConfig::default());
        let (tx, rx) = mpsc::channel(16);
        let listener = reporter.attach_events(rx);

        for _ in 0..3 {
            tx.send(OperationInfo::new("command:A", "file:///plugins/a.jar"))
                .await
                .unwrap();
        }
        for _ in 0..15 {
            tx.send(OperationInfo::new("legacy:B", "file:///plugins/b.jar"))
                .await
                .unwrap();
        }
        drop(tx);
        listener.await.unwrap();

        let snapshot = reporter.table().snapshot();
        let document = report::build_report(imagej_resolver().as_ref(), snapshot.values());
        assert_eq!(document.sites.len(), 1);
        assert_eq!(document.sites[0].name, "ImageJ");
        let counts: Vec<u64> = document.sites[0].stats.iter().map(|s| s.count).collect();
        assert_eq!(counts, [3, 15]);
        let ids: Vec<&str> = document.sites[0]
            .stats
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(ids, ["command:A", "legacy:B"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_flush_uploads_current_counts() {
        let (url, rx) = one_shot_server();
        let config = ReporterConfig {
            opt_in: true,
            server_url: Some(url),
            period_secs: 3600,
        };
        let reporter = UsageReporter::new(imagej_resolver(), config);
        reporter.record(&OperationInfo::new("command:A", "file:///plugins/a.jar"));

        let request = tokio::task::spawn_blocking(move || {
            reporter.flush();
            rx.recv().unwrap()
        })
        .await
        .unwrap();

        assert!(request.starts_with("POST"));
        let body_start = request.find("\r\n\r\n").unwrap() + 4;
        let body: serde_json::Value =
            serde_json::from_str(request.get(body_start..).unwrap()).unwrap();
        assert_eq!(body["sites"][0]["stats"][0]["id"], "command:A");
        assert_eq!(body["sites"][0]["stats"][0]["count"], 1);
        assert!(body["user"].is_string());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_flush_without_opt_in_does_nothing() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let config = ReporterConfig {
            opt_in: false,
            server_url: Some(format!("http://{}", listener.local_addr().unwrap())),
            period_secs: 3600,
        };
        let reporter = UsageReporter::new(imagej_resolver(), config);
        reporter.record(&OperationInfo::new("command:A", "file:///plugins/a.jar"));
        reporter.flush();

        assert!(matches!(
            listener.accept(),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_and_stop_are_idempotent() {
        let mut reporter = UsageReporter::new(imagej_resolver(), ReporterConfig::default());
        assert!(!reporter.is_running());
        reporter.start();
        reporter.start();
        assert!(reporter.is_running());
        reporter.stop();
        reporter.stop();
        assert!(!reporter.is_running());
        // restart after stop works
        reporter.start();
        assert!(reporter.is_running());
        reporter.stop();
    }
}
