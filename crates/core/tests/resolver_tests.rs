//! End-to-end tests for resolving identifiers
//!
//! Covers downloading through a mock HTTP server, reuse of extracted
//! folders, repair of corrupt folders, retention policies, cancellation
//! and concurrent resolves.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;
use unbox_core::{
    ArchiveExtractor, Error, ExtractSummary, ExtractorRegistry, Fingerprint, Phase, Progress,
    ProgressEvent, ProgressReporter, ResolvedEntry, ResourceResolver, RetentionPolicy, Settings,
    ZipExtractor,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn bundle() -> Vec<u8> {
    zip_bytes(&[
        ("index.html", "<html>bundle</html>"),
        ("css/site.css", "body {}"),
    ])
}

/// Zip extractor that counts how often it runs.
#[derive(Default)]
struct CountingExtractor {
    runs: AtomicUsize,
}

impl CountingExtractor {
    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl ArchiveExtractor for CountingExtractor {
    fn name(&self) -> &'static str {
        "counting-zip"
    }

    fn extensions(&self) -> &'static [&'static str] {
        ZipExtractor.extensions()
    }

    fn matches_magic(&self, header: &[u8]) -> bool {
        ZipExtractor.matches_magic(header)
    }

    fn extract(
        &self,
        archive: &Path,
        destination: &Path,
        progress: &Progress,
    ) -> unbox_core::Result<ExtractSummary> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        // Widen the window for concurrent callers.
        std::thread::sleep(Duration::from_millis(20));
        ZipExtractor.extract(archive, destination, progress)
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<ProgressEvent>>);

impl ProgressReporter for Recorder {
    fn report(&self, event: &ProgressEvent) {
        self.0.lock().push(event.clone());
    }
}

struct Fixture {
    temp: TempDir,
    counter: Arc<CountingExtractor>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            temp: TempDir::new().unwrap(),
            counter: Arc::new(CountingExtractor::default()),
        }
    }

    fn settings(&self) -> Settings {
        Settings::with_dirs(self.temp.path().join("cache"), self.temp.path().join("state/versions"))
    }

    fn resolver_with(&self, settings: Settings) -> ResourceResolver {
        let mut extractors = ExtractorRegistry::new();
        extractors.register(self.counter.clone());
        ResourceResolver::builder()
            .settings(settings)
            .extractors(extractors)
            .build()
            .unwrap()
    }

    fn resolver(&self) -> ResourceResolver {
        self.resolver_with(self.settings())
    }

    fn versions(&self) -> std::path::PathBuf {
        self.temp.path().join("state/versions")
    }

    fn write_archive(&self, name: &str, data: &[u8]) -> String {
        let path = self.temp.path().join(name);
        std::fs::write(&path, data).unwrap();
        path.to_str().unwrap().to_string()
    }
}

async fn serve(server: &MockServer, route: &str, body: Vec<u8>, expected_requests: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .expect(expected_requests)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_remote_archive_resolves_into_fingerprint_folder() {
    let fixture = Fixture::new();
    let server = MockServer::start().await;
    let data = bundle();
    serve(&server, "/bundle-1.0.zip", data.clone(), 1).await;

    let url = format!("{}/bundle-1.0.zip", server.uri());
    let resolved = fixture.resolver().resolve(&url, &Progress::new()).await.unwrap();

    let short = Fingerprint::from_bytes(&data).short().to_string();
    let expected = fixture.versions().join(&short).join("index.html");
    match &resolved {
        ResolvedEntry::Extracted {
            path,
            fingerprint,
            freshly_extracted,
        } => {
            assert_eq!(path, &expected);
            assert_eq!(fingerprint.short(), short);
            assert!(freshly_extracted);
        }
        other => panic!("expected an extracted entry, got {other:?}"),
    }
    assert_eq!(
        std::fs::read_to_string(&expected).unwrap(),
        "<html>bundle</html>"
    );
    assert!(fixture.versions().join(&short).join("css/site.css").is_file());
}

#[tokio::test]
async fn test_cached_folder_is_reused_without_download_or_extraction() {
    let fixture = Fixture::new();
    let server = MockServer::start().await;
    serve(&server, "/bundle-1.0.zip", bundle(), 1).await;
    let url = format!("{}/bundle-1.0.zip", server.uri());

    let resolver = fixture.resolver();
    let first = resolver.resolve(&url, &Progress::new()).await.unwrap();
    let second = resolver.resolve(&url, &Progress::new()).await.unwrap();

    assert_eq!(first.path(), second.path());
    assert!(matches!(
        second,
        ResolvedEntry::Extracted {
            freshly_extracted: false,
            ..
        }
    ));
    assert_eq!(fixture.counter.runs(), 1);
}

#[tokio::test]
async fn test_forever_retention_survives_new_resolver() {
    let fixture = Fixture::new();
    let server = MockServer::start().await;
    serve(&server, "/bundle-1.0.zip", bundle(), 1).await;
    let url = format!("{}/bundle-1.0.zip", server.uri());

    fixture.resolver().resolve(&url, &Progress::new()).await.unwrap();
    // New process: fresh cache instance over the same directories.
    fixture.resolver().resolve(&url, &Progress::new()).await.unwrap();
}

#[tokio::test]
async fn test_session_retention_downloads_again_in_new_resolver() {
    let fixture = Fixture::new();
    let server = MockServer::start().await;
    serve(&server, "/bundle.zip", bundle(), 2).await;
    let url = format!("{}/bundle.zip", server.uri());

    let mut settings = fixture.settings();
    settings.retention = RetentionPolicy::Session;

    let resolver = fixture.resolver_with(settings.clone());
    resolver.resolve(&url, &Progress::new()).await.unwrap();
    resolver.resolve(&url, &Progress::new()).await.unwrap();

    fixture.resolver_with(settings).resolve(&url, &Progress::new()).await.unwrap();
    // Same content: extracted once.
    assert_eq!(fixture.counter.runs(), 1);
}

#[tokio::test]
async fn test_no_retention_always_downloads() {
    let fixture = Fixture::new();
    let server = MockServer::start().await;
    serve(&server, "/bundle.zip", bundle(), 2).await;
    let url = format!("{}/bundle.zip", server.uri());

    let mut settings = fixture.settings();
    settings.retention = RetentionPolicy::None;
    let resolver = fixture.resolver_with(settings);

    resolver.resolve(&url, &Progress::new()).await.unwrap();
    resolver.resolve(&url, &Progress::new()).await.unwrap();

    // Transient downloads are gone once resolved.
    let transient = fixture.temp.path().join("cache/transient");
    let leftovers = walk_files(&transient);
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[tokio::test]
async fn test_snapshot_urls_use_session_retention() {
    let fixture = Fixture::new();
    let server = MockServer::start().await;
    serve(&server, "/bundle-1.1-SNAPSHOT.zip", bundle(), 2).await;
    let url = format!("{}/bundle-1.1-SNAPSHOT.zip", server.uri());

    fixture.resolver().resolve(&url, &Progress::new()).await.unwrap();
    fixture.resolver().resolve(&url, &Progress::new()).await.unwrap();
}

#[tokio::test]
async fn test_empty_folder_is_repaired() {
    let fixture = Fixture::new();
    let data = bundle();
    let archive = fixture.write_archive("bundle.zip", &data);

    let folder = fixture.versions().join(Fingerprint::from_bytes(&data).short());
    std::fs::create_dir_all(&folder).unwrap();

    let recorder = Arc::new(Recorder::default());
    let progress = Progress::new().with_reporter(recorder.clone());
    let resolved = fixture.resolver().resolve(&archive, &progress).await.unwrap();

    assert_eq!(resolved.path(), Some(folder.join("index.html").as_path()));
    assert!(matches!(
        resolved,
        ResolvedEntry::Extracted {
            freshly_extracted: true,
            ..
        }
    ));
    assert_eq!(fixture.counter.runs(), 1);
    assert!(
        recorder
            .0
            .lock()
            .iter()
            .any(|event| matches!(event, ProgressEvent::Repairing { .. }))
    );
}

#[tokio::test]
async fn test_missing_entry_point_fails_after_one_retry() {
    let fixture = Fixture::new();
    let archive = fixture.write_archive("docs.zip", &zip_bytes(&[("readme.txt", "no entry point")]));

    let err = fixture
        .resolver()
        .resolve(&archive, &Progress::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Resolve { phase: Phase::Verify, .. }));
    assert!(matches!(err.root(), Error::EntryPointMissing { .. }));
    assert_eq!(fixture.counter.runs(), 2);
}

#[tokio::test]
async fn test_local_directory_is_direct() {
    let fixture = Fixture::new();
    let resolved = fixture
        .resolver()
        .resolve("/local/dir/page", &Progress::new())
        .await
        .unwrap();

    assert_eq!(resolved.location(), "/local/dir/page/index.html");
    assert_eq!(fixture.counter.runs(), 0);
    assert!(!fixture.versions().exists());
}

#[tokio::test]
async fn test_identical_content_shares_one_folder() {
    let fixture = Fixture::new();
    let data = bundle();
    let a = fixture.write_archive("a.zip", &data);
    let b = fixture.write_archive("b.zip", &data);

    let resolver = fixture.resolver();
    let first = resolver.resolve(&a, &Progress::new()).await.unwrap();
    let second = resolver.resolve(&b, &Progress::new()).await.unwrap();

    assert_eq!(first.path(), second.path());
    assert_eq!(fixture.counter.runs(), 1);
}

#[tokio::test]
async fn test_http_error_fails_in_fetch_phase() {
    let fixture = Fixture::new();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = format!("{}/missing.zip", server.uri());
    let err = fixture.resolver().resolve(&url, &Progress::new()).await.unwrap_err();

    assert!(matches!(err, Error::Resolve { phase: Phase::Fetch, .. }));
    assert!(matches!(err.root(), Error::Fetch { .. }));
    assert!(!fixture.versions().exists());
}

/// Deletes the cached archive as soon as it is reported as a hit.
struct DeleteOnCacheHit;

impl ProgressReporter for DeleteOnCacheHit {
    fn report(&self, event: &ProgressEvent) {
        if let ProgressEvent::CacheHit { path, .. } = event {
            std::fs::remove_file(path).unwrap();
        }
    }
}

#[tokio::test]
async fn test_unreadable_artifact_fails_in_fingerprint_phase() {
    let fixture = Fixture::new();
    let server = MockServer::start().await;
    serve(&server, "/bundle-1.0.zip", bundle(), 1).await;
    let url = format!("{}/bundle-1.0.zip", server.uri());

    let resolver = fixture.resolver();
    resolver.resolve(&url, &Progress::new()).await.unwrap();

    let progress = Progress::new().with_reporter(Arc::new(DeleteOnCacheHit));
    let err = resolver.resolve(&url, &progress).await.unwrap_err();

    assert!(matches!(err, Error::Resolve { phase: Phase::Fingerprint, .. }));
    assert!(matches!(err.root(), Error::Hash { .. }));
    assert_eq!(fixture.counter.runs(), 1);
}

#[tokio::test]
async fn test_cancelled_before_resolve_creates_nothing() {
    let fixture = Fixture::new();
    let archive = fixture.write_archive("bundle.zip", &bundle());

    let progress = Progress::new();
    progress.cancel();
    let err = fixture.resolver().resolve(&archive, &progress).await.unwrap_err();

    assert!(matches!(err, Error::Cancelled { .. }));
    assert!(!fixture.versions().exists());
}

/// Cancels as soon as extraction starts.
struct CancelOnExtract(Progress);

impl ProgressReporter for CancelOnExtract {
    fn report(&self, event: &ProgressEvent) {
        if matches!(event, ProgressEvent::ExtractStarted { .. }) {
            self.0.cancel();
        }
    }
}

#[tokio::test]
async fn test_cancelled_during_extraction_leaves_no_folder() {
    let fixture = Fixture::new();
    let data = bundle();
    let archive = fixture.write_archive("bundle.zip", &data);

    let progress = Progress::new();
    let progress = progress.clone().with_reporter(Arc::new(CancelOnExtract(progress)));
    let err = fixture.resolver().resolve(&archive, &progress).await.unwrap_err();

    assert!(matches!(err, Error::Cancelled { phase: Phase::Extract }));
    let folder = fixture.versions().join(Fingerprint::from_bytes(&data).short());
    assert!(!folder.exists());
    assert!(walk_files(&fixture.versions()).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolves_extract_once() {
    let fixture = Fixture::new();
    let server = MockServer::start().await;
    serve(&server, "/bundle-1.0.zip", bundle(), 1).await;
    let url = format!("{}/bundle-1.0.zip", server.uri());

    let resolver = Arc::new(fixture.resolver());
    let mut handles = Vec::new();
    for _ in 0..8 {
        let resolver = Arc::clone(&resolver);
        let url = url.clone();
        handles.push(tokio::spawn(async move {
            resolver.resolve(&url, &Progress::new()).await
        }));
    }

    let mut paths = Vec::new();
    for handle in handles {
        let resolved = handle.await.unwrap().unwrap();
        paths.push(resolved.path().unwrap().to_path_buf());
    }

    assert!(paths.windows(2).all(|pair| pair[0] == pair[1]));
    assert!(paths[0].is_file());
    assert_eq!(fixture.counter.runs(), 1);
}

#[tokio::test]
async fn test_resolve_configured_uses_source_url() {
    let fixture = Fixture::new();
    let server = MockServer::start().await;
    serve(&server, "/landing.zip", bundle(), 1).await;

    let mut settings = fixture.settings();
    settings.source_url = format!("{}/landing.zip", server.uri());

    let resolved = fixture
        .resolver_with(settings)
        .resolve_configured(&Progress::new())
        .await
        .unwrap();
    assert!(resolved.path().unwrap().ends_with("index.html"));
}

fn walk_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            files.extend(walk_files(&path));
        } else {
            files.push(path);
        }
    }
    files
}
