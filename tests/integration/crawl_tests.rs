//! Integration tests for the crawler
//!
//! The end-to-end tests use wiremock to serve a small site and drive the full
//! crawl from a config file. The property tests drive the coordinator with an
//! in-memory fetcher so retries, pagination and deduplication can be observed.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sumi_sieve::config::{load_config_with_hash, LoginConfig, RuleConfig};
use sumi_sieve::crawler::{
    crawl, Coordinator, CrawlOptions, CrawlSettings, Fetcher, HtmlExtractor, RawResource,
};
use sumi_sieve::output::CrawlReport;
use sumi_sieve::storage::{
    FsStore, LedgerRecord, LedgerStorage, PersistenceLedger, RunCounts, RunRecord, RunStatus,
    SqliteStorage, StorageResult,
};
use sumi_sieve::{FetchError, ResourceId, RuleSet};
use tempfile::TempDir;
use tokio::sync::watch;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ===== Helpers =====

/// In-memory site: serves canned HTML and can fail a URL a number of times first
#[derive(Clone, Default)]
struct MockSite {
    inner: Arc<MockSiteInner>,
}

#[derive(Default)]
struct MockSiteInner {
    pages: Mutex<HashMap<String, String>>,
    transient_failures: Mutex<HashMap<String, u32>>,
    fetches: Mutex<Vec<String>>,
}

impl MockSite {
    fn page(self, url: &str, body: &str) -> Self {
        self.inner
            .pages
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_string());
        self
    }

    fn failing(self, url: &str, times: u32) -> Self {
        self.inner
            .transient_failures
            .lock()
            .unwrap()
            .insert(url.to_string(), times);
        self
    }

    fn fetches(&self) -> Vec<String> {
        self.inner.fetches.lock().unwrap().clone()
    }

    fn fetch_count(&self, url: &str) -> usize {
        self.fetches().iter().filter(|u| u.as_str() == url).count()
    }
}

#[async_trait]
impl Fetcher for MockSite {
    type Session = ();

    async fn open_session(&self, _login: Option<&LoginConfig>) -> Result<(), FetchError> {
        Ok(())
    }

    async fn fetch(&self, url: &Url, _session: &()) -> Result<RawResource, FetchError> {
        self.inner.fetches.lock().unwrap().push(url.to_string());

        if let Some(left) = self
            .inner
            .transient_failures
            .lock()
            .unwrap()
            .get_mut(url.as_str())
        {
            if *left > 0 {
                *left -= 1;
                return Err(FetchError::Transient {
                    url: url.to_string(),
                    reason: "connection reset".to_string(),
                });
            }
        }

        match self.inner.pages.lock().unwrap().get(url.as_str()) {
            Some(body) => Ok(RawResource::new(url.clone(), Some("text/html"), body.as_str())),
            None => Err(FetchError::Permanent {
                url: url.to_string(),
                reason: "HTTP 404".to_string(),
            }),
        }
    }
}

/// Ledger backend that counts record writes
struct CountingStorage {
    inner: SqliteStorage,
    upserts: Arc<AtomicUsize>,
}

impl LedgerStorage for CountingStorage {
    fn load_records(&self) -> StorageResult<Vec<LedgerRecord>> {
        self.inner.load_records()
    }

    fn upsert_record(&mut self, record: &LedgerRecord) -> StorageResult<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert_record(record)
    }

    fn count_records(&self) -> StorageResult<u64> {
        self.inner.count_records()
    }

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        self.inner.create_run(config_hash)
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus, counts: &RunCounts) -> StorageResult<()> {
        self.inner.finish_run(run_id, status, counts)
    }

    fn recent_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        self.inner.recent_runs(limit)
    }
}

fn rule(url: &str, selector: Option<&str>, file_path: Option<&str>) -> RuleConfig {
    RuleConfig {
        url: url.to_string(),
        selector: selector.map(str::to_string),
        as_url: None,
        file_path: file_path.map(str::to_string),
        paging: false,
        next_page: None,
        follow: true,
    }
}

fn settings(save_dir: &Path, start: &str) -> CrawlSettings {
    CrawlSettings {
        start_url: Url::parse(start).unwrap(),
        save_dir: save_dir.to_path_buf(),
        concurrency: 4,
        max_retries: 3,
        retry_base_delay: Duration::from_millis(5),
        force_refresh: false,
        grace_period: Duration::from_secs(5),
        login: None,
        config_hash: "test".to_string(),
    }
}

async fn run(
    settings: CrawlSettings,
    rules: &[RuleConfig],
    site: &MockSite,
    ledger: &Arc<PersistenceLedger>,
) -> CrawlReport {
    let rules = RuleSet::compile(rules, &[]).unwrap();
    let coordinator = Coordinator::new(
        settings,
        rules,
        site.clone(),
        HtmlExtractor,
        FsStore,
        Arc::clone(ledger),
    )
    .unwrap();

    let (_stop_tx, stop_rx) = watch::channel(false);
    coordinator.run(stop_rx).await.unwrap()
}

fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("site.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    path
}

// ===== End-to-end =====

#[tokio::test]
async fn test_full_crawl_against_http_server() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let port = Url::parse(&base_url).unwrap().port().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string(
                    r#"<html><body>
                    <div class="main">Welcome</div>
                    <a href="/item/1">One</a>
                    <a href="/item/2">Two</a>
                    <a href="/elsewhere">Not matched</a>
                    </body></html>"#,
                ),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    for n in 1..=2 {
        Mock::given(method("GET"))
            .and(path(format!("/item/{}", n)))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string(format!(
                        r#"<html><body><p class="text">item {}</p><p>footer</p></body></html>"#,
                        n
                    )),
            )
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let save_dir = dir.path().join("out");
    let escaped = regex::escape(&base_url);
    let config_path = write_config(
        &dir,
        &format!(
            r#"
start-url = "{base}/"
save-dir = '{save}'
concurrency = 2

[[rule]]
url = '{esc}/'
selector = "div.main"

[[rule]]
url = '{esc}/item/(?P<id>\d+)'
selector = "p.text"
file-path = "items/${{id}}.html"
"#,
            base = base_url,
            save = save_dir.display(),
            esc = escaped
        ),
    );

    let (config, hash) = load_config_with_hash(&config_path).unwrap();

    // First run fetches everything
    let (_tx, rx) = watch::channel(false);
    let report = crawl(&config, &hash, &CrawlOptions::default(), rx)
        .await
        .unwrap();

    assert_eq!(report.done, 3);
    assert_eq!(report.skipped, 0);
    assert!(report.failures.is_empty());
    assert_eq!(report.exit_code(), 0);

    let index = std::fs::read_to_string(save_dir.join(format!("127.0.0.1_{}/index.html", port)))
        .unwrap();
    assert_eq!(index, r#"<div class="main">Welcome</div>"#);
    assert_eq!(
        std::fs::read_to_string(save_dir.join("items/2.html")).unwrap(),
        r#"<p class="text">item 2</p>"#
    );

    // Second run is served entirely from the ledger
    let (_tx, rx) = watch::channel(false);
    let report = crawl(&config, &hash, &CrawlOptions::default(), rx)
        .await
        .unwrap();

    assert_eq!(report.done, 0);
    assert_eq!(report.skipped, 3);

    let ledger = PersistenceLedger::open(&save_dir).unwrap();
    let root = ledger.get(&ResourceId::new(format!("{}/", base_url))).unwrap();
    assert_eq!(root.file_path, Some(format!("127.0.0.1_{}/index.html", port)));
    assert_eq!(root.links.len(), 3);

    let runs = ledger.recent_runs(10).unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].counts.skipped, 3);
    assert_eq!(runs[1].config_hash, hash);
}

#[tokio::test]
async fn test_permanent_http_errors_are_reported() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string(r#"<a href="/missing">gone</a>"#),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let escaped = regex::escape(&base_url);
    let config_path = write_config(
        &dir,
        &format!(
            r#"
start-url = "{base}/"
save-dir = '{save}'

[[rule]]
url = '{esc}/'

[[rule]]
url = '{esc}/(\w+)'
file-path = "$1.bin"
"#,
            base = base_url,
            save = dir.path().join("out").display(),
            esc = escaped
        ),
    );

    let (config, hash) = load_config_with_hash(&config_path).unwrap();
    let (_tx, rx) = watch::channel(false);
    let report = crawl(&config, &hash, &CrawlOptions::default(), rx)
        .await
        .unwrap();

    assert_eq!(report.done, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].rule, 1);
    assert!(report.failures[0].url.ends_with("/missing"));
    assert_eq!(report.exit_code(), 2);
}

// ===== Properties =====

#[tokio::test]
async fn test_retry_records_once() {
    let dir = TempDir::new().unwrap();
    let site = MockSite::default()
        .page("http://site.test/", r#"<a href="/flaky">flaky</a>"#)
        .page("http://site.test/flaky", r#"<p id="c">finally</p>"#)
        .failing("http://site.test/flaky", 2);

    let upserts = Arc::new(AtomicUsize::new(0));
    let ledger = Arc::new(
        PersistenceLedger::with_storage(Box::new(CountingStorage {
            inner: SqliteStorage::open_in_memory().unwrap(),
            upserts: Arc::clone(&upserts),
        }))
        .unwrap(),
    );

    let report = run(
        settings(dir.path(), "http://site.test/"),
        &[
            rule(r"http://site\.test/", None, None),
            rule(r"http://site\.test/flaky", Some("p#c"), Some("flaky.html")),
        ],
        &site,
        &ledger,
    )
    .await;

    assert_eq!(site.fetch_count("http://site.test/flaky"), 3);
    assert_eq!(report.retried, 2);
    assert_eq!(report.done, 2);
    assert!(report.failures.is_empty());

    // One write for the root page, one for the flaky page
    assert_eq!(upserts.load(Ordering::SeqCst), 2);
    assert!(dir.path().join("flaky.html").exists());
}

#[tokio::test]
async fn test_retries_exhausted_fail_terminally() {
    let dir = TempDir::new().unwrap();
    let site = MockSite::default()
        .page("http://site.test/", r#"<a href="/down">down</a>"#)
        .page("http://site.test/down", "<p>never served</p>")
        .failing("http://site.test/down", 10);

    let ledger = Arc::new(PersistenceLedger::in_memory().unwrap());
    let mut settings = settings(dir.path(), "http://site.test/");
    settings.max_retries = 2;

    let report = run(
        settings,
        &[
            rule(r"http://site\.test/", None, None),
            rule(r"http://site\.test/down", None, Some("down.html")),
        ],
        &site,
        &ledger,
    )
    .await;

    assert_eq!(site.fetch_count("http://site.test/down"), 3);
    assert_eq!(report.retried, 2);
    assert_eq!(report.failures.len(), 1);
    assert!(ledger.get(&ResourceId::new("http://site.test/down")).is_none());
}

#[tokio::test]
async fn test_pagination_is_sequential_and_appends() {
    let dir = TempDir::new().unwrap();
    let site = MockSite::default()
        .page(
            "http://site.test/list/cats",
            r#"<ul class="items"><li>a</li></ul>
               <a href="/list/cats?page=3">3</a>
               <a rel="next" href="/list/cats?page=2">next</a>"#,
        )
        .page(
            "http://site.test/list/cats?page=2",
            r#"<ul class="items"><li>b</li></ul>
               <a rel="next" href="/list/cats?page=3">next</a>"#,
        )
        .page(
            "http://site.test/list/cats?page=3",
            r#"<ul class="items"><li>c</li></ul>"#,
        );

    let ledger = Arc::new(PersistenceLedger::in_memory().unwrap());
    let report = run(
        settings(dir.path(), "http://site.test/list/cats"),
        &[paging_rule()],
        &site,
        &ledger,
    )
    .await;

    assert_eq!(
        site.fetches(),
        vec![
            "http://site.test/list/cats",
            "http://site.test/list/cats?page=2",
            "http://site.test/list/cats?page=3",
        ]
    );
    assert_eq!(report.done, 3);

    let content = std::fs::read_to_string(dir.path().join("lists/cats.html")).unwrap();
    let a = content.find("<li>a</li>").unwrap();
    let b = content.find("<li>b</li>").unwrap();
    let c = content.find("<li>c</li>").unwrap();
    assert!(a < b && b < c);

    let last = ledger
        .get(&ResourceId::new("http://site.test/list/cats?page=3"))
        .unwrap();
    assert_eq!(last.file_path.as_deref(), Some("lists/cats.html"));
    assert_eq!(last.next_page, None);
}

fn paging_rule() -> RuleConfig {
    let mut paging = rule(
        r"http://site\.test/list/(\w+)(?:\?page=\d+)?",
        Some("ul.items"),
        Some("lists/$1.html"),
    );
    paging.paging = true;
    paging
}

fn cats_sequence(site: MockSite) -> MockSite {
    site.page(
        "http://site.test/list/cats",
        r#"<ul class="items"><li>a</li></ul>
           <a rel="next" href="/list/cats?page=2">next</a>"#,
    )
    .page(
        "http://site.test/list/cats?page=2",
        r#"<ul class="items"><li>b</li></ul>
           <a rel="next" href="/list/cats?page=3">next</a>"#,
    )
    .page(
        "http://site.test/list/cats?page=3",
        r#"<ul class="items"><li>c</li></ul>"#,
    )
}

#[tokio::test]
async fn test_direct_link_into_sequence_keeps_first_page() {
    let dir = TempDir::new().unwrap();
    let site = cats_sequence(MockSite::default().page(
        "http://site.test/",
        r#"<a href="/list/cats">cats</a><a href="/list/cats?page=2">cats, page 2</a>"#,
    ));

    let ledger = Arc::new(PersistenceLedger::in_memory().unwrap());
    let report = run(
        settings(dir.path(), "http://site.test/"),
        &[rule(r"http://site\.test/", None, None), paging_rule()],
        &site,
        &ledger,
    )
    .await;

    assert_eq!(report.done, 4);
    assert!(report.failures.is_empty());
    for url in [
        "http://site.test/list/cats",
        "http://site.test/list/cats?page=2",
        "http://site.test/list/cats?page=3",
    ] {
        assert_eq!(site.fetch_count(url), 1, "{} fetched more than once", url);
    }

    let content = std::fs::read_to_string(dir.path().join("lists/cats.html")).unwrap();
    let a = content.find("<li>a</li>").expect("first page missing");
    let b = content.find("<li>b</li>").unwrap();
    let c = content.find("<li>c</li>").unwrap();
    assert!(a < b && b < c);
}

#[tokio::test]
async fn test_paging_page_links_to_other_sequences() {
    let dir = TempDir::new().unwrap();
    let site = MockSite::default()
        .page(
            "http://site.test/list/cats",
            r#"<ul class="items"><li>a</li></ul><a href="/list/dogs">dogs</a>"#,
        )
        .page(
            "http://site.test/list/dogs",
            r#"<ul class="items"><li>woof</li></ul><a href="/list/cats">cats</a>"#,
        );

    let ledger = Arc::new(PersistenceLedger::in_memory().unwrap());
    let report = run(
        settings(dir.path(), "http://site.test/list/cats"),
        &[paging_rule()],
        &site,
        &ledger,
    )
    .await;

    assert_eq!(report.done, 2);
    assert_eq!(site.fetch_count("http://site.test/list/cats"), 1);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("lists/dogs.html")).unwrap(),
        r#"<ul class="items"><li>woof</li></ul>"#
    );
}

#[tokio::test]
async fn test_default_paths_of_parent_and_child_pages() {
    let dir = TempDir::new().unwrap();
    let site = MockSite::default()
        .page("http://site.test/", r#"<p>root</p><a href="/a">a</a>"#)
        .page("http://site.test/a", r#"<p>child</p><a href="/a/b">b</a>"#)
        .page("http://site.test/a/b", "<p>grandchild</p>");

    let ledger = Arc::new(PersistenceLedger::in_memory().unwrap());
    let report = run(
        settings(dir.path(), "http://site.test/"),
        &[rule(r"http://site\.test/.*", Some("p"), None)],
        &site,
        &ledger,
    )
    .await;

    assert_eq!(report.done, 3);
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    for (file, content) in [
        ("site.test/index.html", "<p>root</p>"),
        ("site.test/a/index.html", "<p>child</p>"),
        ("site.test/a/b/index.html", "<p>grandchild</p>"),
    ] {
        assert_eq!(std::fs::read_to_string(dir.path().join(file)).unwrap(), content);
    }
}

#[tokio::test]
async fn test_shared_links_are_fetched_once() {
    let dir = TempDir::new().unwrap();
    let site = MockSite::default()
        .page(
            "http://site.test/",
            r#"<a href="/a">a</a><a href="/b">b</a><a href="/shared">s</a>"#,
        )
        .page("http://site.test/a", r#"<a href="/shared#top">s</a><a href="/">home</a>"#)
        .page("http://site.test/b", r#"<a href="/shared">s</a>"#)
        .page("http://site.test/shared", "<p>shared</p>");

    let ledger = Arc::new(PersistenceLedger::in_memory().unwrap());
    let report = run(
        settings(dir.path(), "http://site.test/"),
        &[rule(r"http://site\.test/\w*", None, None)],
        &site,
        &ledger,
    )
    .await;

    assert_eq!(report.done, 4);
    for url in [
        "http://site.test/",
        "http://site.test/a",
        "http://site.test/b",
        "http://site.test/shared",
    ] {
        assert_eq!(site.fetch_count(url), 1, "{} fetched more than once", url);
    }
}

#[tokio::test]
async fn test_second_run_fetches_nothing() {
    let dir = TempDir::new().unwrap();
    let site = MockSite::default()
        .page("http://site.test/", r#"<a href="/p/1">1</a><a href="/p/2">2</a>"#)
        .page("http://site.test/p/1", r#"<a href="/p/3">3</a><p>1</p>"#)
        .page("http://site.test/p/2", "<p>2</p>")
        .page("http://site.test/p/3", "<p>3</p>");
    let rules = [
        rule(r"http://site\.test/", None, None),
        rule(r"http://site\.test/p/(\d+)", Some("p"), Some("p/$1.html")),
    ];
    let ledger = Arc::new(PersistenceLedger::open(dir.path()).unwrap());

    let first = run(settings(dir.path(), "http://site.test/"), &rules, &site, &ledger).await;
    assert_eq!(first.done, 4);
    let fetched = site.fetches().len();

    let reopened = Arc::new(PersistenceLedger::open(dir.path()).unwrap());
    let second = run(settings(dir.path(), "http://site.test/"), &rules, &site, &reopened).await;

    assert_eq!(second.done, 0);
    assert_eq!(second.skipped, 4);
    assert_eq!(site.fetches().len(), fetched);

    // Forcing a refresh fetches everything again
    let mut forced = settings(dir.path(), "http://site.test/");
    forced.force_refresh = true;
    let third = run(forced, &rules, &site, &reopened).await;

    assert_eq!(third.done, 4);
    assert_eq!(site.fetches().len(), fetched * 2);
}

#[tokio::test]
async fn test_path_traversal_is_refused() {
    let dir = TempDir::new().unwrap();
    let save_dir = dir.path().join("out");
    let site = MockSite::default()
        .page(
            "http://site.test/",
            r#"<a href="/dl?name=../../escape.txt">evil</a><a href="/dl?name=fine.txt">ok</a>"#,
        )
        .page("http://site.test/dl?name=../../escape.txt", "pwned")
        .page("http://site.test/dl?name=fine.txt", "fine");

    let ledger = Arc::new(PersistenceLedger::in_memory().unwrap());
    let report = run(
        settings(&save_dir, "http://site.test/"),
        &[
            rule(r"http://site\.test/", None, None),
            rule(r"http://site\.test/dl\?name=(.+)", None, Some("files/$1")),
        ],
        &site,
        &ledger,
    )
    .await;

    assert_eq!(report.done, 2);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].error.contains("escapes the save directory"));
    assert_eq!(site.fetch_count("http://site.test/dl?name=../../escape.txt"), 0);
    assert!(!dir.path().join("escape.txt").exists());
    assert_eq!(
        std::fs::read_to_string(save_dir.join("files/fine.txt")).unwrap(),
        "fine"
    );
}
