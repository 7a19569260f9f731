//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the worker pool that drives a crawl, including:
//! - Seeding the frontier with the start URL
//! - Running a bounded set of workers that drain the frontier
//! - Skipping resources the ledger already holds, re-expanding their links
//! - Fetching, extracting, persisting and recording each resource
//! - Handling stop requests with a grace period
//! - Aggregating per-item outcomes into the run report

use crate::config::{Config, LoginConfig};
use crate::crawler::{Extractor, Fetcher, Frontier, FailOutcome, RawResource};
use crate::output::{CrawlReport, FailureRecord};
use crate::rules::{Persist, Rule, RuleSet};
use crate::state::{CrawlItem, Discarded, ResourceId};
use crate::storage::{LedgerRecord, PersistenceLedger, Store};
use crate::url::{normalize_url, PathResolver};
use crate::{ConfigError, SieveError};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use url::Url;

/// How many finished items between two progress lines
const PROGRESS_INTERVAL: u64 = 25;

/// Default time in-flight work gets to finish after a stop request
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Settings of one crawl run
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub start_url: Url,
    pub save_dir: PathBuf,
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    /// Re-fetch resources even if the ledger already holds them
    pub force_refresh: bool,
    pub grace_period: Duration,
    pub login: Option<LoginConfig>,
    /// Hash of the config file, stored with the run
    pub config_hash: String,
}

impl CrawlSettings {
    /// Builds settings from a validated config
    pub fn from_config(config: &Config, config_hash: &str) -> Result<Self, ConfigError> {
        let start_url = normalize_url(&config.start_url)
            .map_err(|e| ConfigError::InvalidUrl(e.to_string()))?;

        Ok(Self {
            start_url,
            save_dir: PathBuf::from(&config.save_dir),
            concurrency: config.concurrency.max(1) as usize,
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            force_refresh: false,
            grace_period: DEFAULT_GRACE_PERIOD,
            login: config.login.clone(),
            config_hash: config_hash.to_string(),
        })
    }
}

/// What a worker did with an item
enum Handled {
    Done(Vec<CrawlItem>),
    Skipped(Vec<CrawlItem>),
}

/// State shared by every worker
struct Shared<F, E, S> {
    settings: CrawlSettings,
    rules: RuleSet,
    resolver: PathResolver,
    fetcher: F,
    extractor: E,
    store: S,
    ledger: Arc<PersistenceLedger>,
    frontier: Frontier,
    /// Output file of each paging sequence started this run, with its head
    sequence_heads: Mutex<HashMap<PathBuf, (usize, ResourceId)>>,
    report: Mutex<CrawlReport>,
    started: Instant,
}

/// Main crawler coordinator structure
///
/// Generic over the three capabilities it drives, so the same orchestration runs
/// against the network or against in-memory doubles.
pub struct Coordinator<F, E, S> {
    shared: Arc<Shared<F, E, S>>,
}

impl<F, E, S> Coordinator<F, E, S>
where
    F: Fetcher + 'static,
    F::Session: 'static,
    E: Extractor + 'static,
    S: Store + 'static,
{
    /// Creates a new coordinator instance
    ///
    /// Every selector in the rule table is checked against the extractor here, so a
    /// bad selector is reported before any network activity.
    pub fn new(
        settings: CrawlSettings,
        rules: RuleSet,
        fetcher: F,
        extractor: E,
        store: S,
        ledger: Arc<PersistenceLedger>,
    ) -> Result<Self, ConfigError> {
        for rule in rules.iter() {
            let selectors = rule
                .content_selector
                .iter()
                .chain(rule.paging.then_some(&rule.next_page_selector));
            for selector in selectors {
                extractor
                    .check_selector(selector)
                    .map_err(|e| ConfigError::InvalidSelector {
                        rule: rule.index,
                        message: e.to_string(),
                    })?;
            }
        }

        let frontier = Frontier::new(settings.max_retries, settings.retry_base_delay);
        let resolver = PathResolver::new(settings.save_dir.clone());

        Ok(Self {
            shared: Arc::new(Shared {
                settings,
                rules,
                resolver,
                fetcher,
                extractor,
                store,
                ledger,
                frontier,
                sequence_heads: Mutex::new(HashMap::new()),
                report: Mutex::new(CrawlReport::default()),
                started: Instant::now(),
            }),
        })
    }

    /// Runs the crawl until the frontier drains or `stop` turns true
    ///
    /// Per-item failures never abort the run; they end up in the returned report.
    /// Only an unusable start URL, a failed login or a ledger that cannot record the
    /// run itself are returned as errors.
    pub async fn run(self, mut stop: watch::Receiver<bool>) -> Result<CrawlReport, SieveError> {
        let shared = self.shared;
        let settings = &shared.settings;

        let seed = match CrawlItem::discover(&shared.rules, settings.start_url.clone(), None)? {
            Ok(item) => item,
            Err(reason) => {
                return Err(ConfigError::Validation(format!(
                    "start URL {} is not crawlable ({:?})",
                    settings.start_url, reason
                ))
                .into())
            }
        };

        let session = Arc::new(
            shared
                .fetcher
                .open_session(settings.login.as_ref())
                .await?,
        );

        let run_id = shared.ledger.start_run(&settings.config_hash)?;
        info!(
            "Starting crawl run {} at {} with {} workers ({} resources already recorded)",
            run_id,
            settings.start_url,
            settings.concurrency,
            shared.ledger.len()
        );

        shared.claim_sequence_head(&seed);
        shared.frontier.offer(seed);

        let mut workers = JoinSet::new();
        for worker in 0..settings.concurrency {
            let shared = Arc::clone(&shared);
            let session = Arc::clone(&session);
            workers.spawn(async move {
                debug!("Worker {} started", worker);
                while let Ok(item) = shared.frontier.take().await {
                    shared.process(item, &session).await;
                }
                debug!("Worker {} finished", worker);
            });
        }

        let mut stop_open = true;
        let mut interrupted = *stop.borrow();
        while !interrupted {
            tokio::select! {
                joined = workers.join_next() => match joined {
                    Some(Err(e)) if e.is_panic() => error!("Worker panicked: {}", e),
                    Some(_) => {}
                    None => break,
                },
                changed = stop.changed(), if stop_open => match changed {
                    Ok(()) => interrupted = *stop.borrow(),
                    Err(_) => stop_open = false,
                },
            }
        }

        if interrupted {
            warn!(
                "Stop requested; waiting up to {:?} for in-flight items",
                settings.grace_period
            );
            shared.frontier.close();

            let drained = tokio::time::timeout(settings.grace_period, async {
                while workers.join_next().await.is_some() {}
            })
            .await;

            if drained.is_err() {
                warn!("Grace period elapsed; aborting remaining workers");
                workers.abort_all();
                while workers.join_next().await.is_some() {}
            }
        }

        let report = {
            let mut report = shared.lock_report();
            report.interrupted = interrupted;
            report.clone()
        };

        shared
            .ledger
            .finish_run(run_id, report.run_status(), &report.counts())?;

        info!(
            "Crawl run {} finished in {:?}: {} done, {} skipped, {} retried, {} failed",
            run_id,
            shared.started.elapsed(),
            report.done,
            report.skipped,
            report.retried,
            report.failed()
        );

        Ok(report)
    }
}

impl<F, E, S> Shared<F, E, S>
where
    F: Fetcher,
    E: Extractor,
    S: Store,
{
    /// Processes a single item and reports the outcome to the frontier
    async fn process(&self, item: CrawlItem, session: &F::Session) {
        let Some(rule) = self.rules.get(item.rule) else {
            error!("Item {} refers to unknown rule {}", item.id, item.rule);
            self.frontier.fail(&item.id, false);
            return;
        };

        debug!(
            "Processing {} (rule {}, page {})",
            item.fetch_url, rule.index, item.page_index
        );

        match self.handle(&item, rule, session).await {
            Ok(Handled::Done(discovered)) => {
                let added = self.frontier.complete(&item.id, discovered);
                debug!("Done {} ({} new items)", item.id, added);
                self.tally(|report| report.done += 1);
            }
            Ok(Handled::Skipped(discovered)) => {
                let added = self.frontier.skip(&item.id, discovered);
                debug!("Skipped {} (already recorded, {} new items)", item.id, added);
                self.tally(|report| report.skipped += 1);
            }
            Err(err) => self.handle_failure(&item, rule, err),
        }
    }

    fn handle_failure(&self, item: &CrawlItem, rule: &Rule, err: SieveError) {
        let retryable = is_retryable(&err);

        if matches!(err, SieveError::Resolve(crate::ResolveError::PathTraversal { .. })) {
            error!(
                "Refusing {} (rule {}): {}; the page may be hostile",
                item.source_url, rule.index, err
            );
        }

        match self.frontier.fail(&item.id, retryable) {
            FailOutcome::Retrying { attempt, delay } => {
                warn!(
                    "Retrying {} (rule {}) in {:?}, attempt {}/{}: {}",
                    item.fetch_url,
                    rule.index,
                    delay,
                    attempt,
                    self.settings.max_retries,
                    err
                );
                self.lock_report().retried += 1;
            }
            FailOutcome::Failed => {
                error!("Failed {} (rule {}): {}", item.fetch_url, rule.index, err);
                self.tally(|report| {
                    report.failures.push(FailureRecord {
                        url: item.fetch_url.to_string(),
                        rule: rule.index,
                        error: err.to_string(),
                    })
                });
            }
        }
    }

    /// Runs the pipeline for one item
    ///
    /// 1. Resolves the output path
    /// 2. Checks the ledger (skip unless forced)
    /// 3. Fetches the resource
    /// 4. Extracts content, links and the next page
    /// 5. Writes the content (continuation pages append)
    /// 6. Records the resource in the ledger
    async fn handle(
        &self,
        item: &CrawlItem,
        rule: &Rule,
        session: &F::Session,
    ) -> Result<Handled, SieveError> {
        let persist = rule.persist();
        let path = match persist {
            Persist::Nothing => None,
            _ => Some(self.resolver.resolve(rule, &item.groups, &item.path_url)?),
        };

        if !self.settings.force_refresh {
            if let Some(record) = self.ledger.get(&item.id) {
                let links = parse_urls(&record.links);
                let next_page = record.next_page.as_deref().and_then(|u| Url::parse(u).ok());
                return Ok(Handled::Skipped(self.expand(
                    item,
                    rule,
                    links,
                    next_page,
                )));
            }
        }

        let resource = self.fetcher.fetch(&item.fetch_url, session).await?;

        let content = match &persist {
            Persist::Selected(selector) => {
                let node = self.extractor.extract_content(&resource, selector)?;
                let mut bytes = node.into_bytes();
                if item.is_continuation() {
                    bytes.insert(0, b'\n');
                }
                Some(bytes)
            }
            Persist::Body => Some(resource.body.clone()),
            Persist::Nothing => None,
        };

        let links = if rule.follow {
            self.extractor.extract_links(&resource)?
        } else {
            Vec::new()
        };

        let next_page = if rule.paging {
            self.extractor.extract_next_page(&resource, rule)?
        } else {
            None
        };

        let content_hash = match (&path, &content) {
            (Some(path), Some(bytes)) => {
                self.write(item, path, bytes).await?;
                Some(hex::encode(Sha256::digest(bytes)))
            }
            _ => None,
        };

        let record = LedgerRecord {
            id: item.id.to_string(),
            source_url: item.source_url.to_string(),
            file_path: path.as_deref().map(|p| self.relative_display(p)),
            content_hash,
            completed_at: Utc::now().to_rfc3339(),
            links: links.iter().map(Url::to_string).collect(),
            next_page: next_page.as_ref().map(Url::to_string),
        };
        self.ledger.record(record)?;

        log_fetch(&resource, item);
        Ok(Handled::Done(self.expand(item, rule, links, next_page)))
    }

    async fn write(&self, item: &CrawlItem, path: &Path, bytes: &[u8]) -> Result<(), SieveError> {
        if item.is_continuation() {
            self.store.append_atomic(path, bytes).await?;
        } else {
            if self.store.exists(path).await {
                debug!("Overwriting {}", path.display());
            }
            self.store.write_atomic(path, bytes).await?;
        }
        Ok(())
    }

    /// Turns the follow-ups of a resource into crawl items
    ///
    /// The next page comes first so it claims its id as a continuation before any
    /// plain link to the same URL.
    fn expand(
        &self,
        item: &CrawlItem,
        rule: &Rule,
        links: Vec<Url>,
        next_page: Option<Url>,
    ) -> Vec<CrawlItem> {
        let mut discovered = Vec::new();

        if let Some(next) = next_page {
            match item.next_page(rule, next) {
                Ok(continuation) => discovered.push(continuation),
                Err(e) => warn!("Dropping next page of {}: {}", item.source_url, e),
            }
        }

        for link in links {
            match CrawlItem::discover(&self.rules, link.clone(), Some(item.source_url.clone())) {
                Ok(Ok(found)) => {
                    if self.claim_sequence_head(&found) {
                        discovered.push(found);
                    }
                }
                Ok(Err(Discarded::Ignored)) => debug!("Ignoring {}", link),
                Ok(Err(Discarded::NoRule)) => debug!("No rule matches {}", link),
                Err(e) => warn!("Dropping {} found on {}: {}", link, item.source_url, e),
            }
        }

        discovered
    }

    /// Decides whether a first page of a paging rule may start a sequence
    ///
    /// Each output file has at most one sequence head per run. Only the head replaces
    /// the file; every later page of its sequence appends. Any other first page aimed
    /// at a claimed file is left to the head's next-page chain.
    fn claim_sequence_head(&self, item: &CrawlItem) -> bool {
        let Some(rule) = self.rules.get(item.rule) else {
            return true;
        };
        if !rule.paging || item.is_continuation() || matches!(rule.persist(), Persist::Nothing) {
            return true;
        }
        // An unresolvable path fails the item when it is processed
        let Ok(path) = self.resolver.resolve(rule, &item.groups, &item.path_url) else {
            return true;
        };

        let mut heads = self
            .sequence_heads
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match heads.entry(path) {
            Entry::Vacant(slot) => {
                slot.insert((rule.index, item.id.clone()));
                true
            }
            Entry::Occupied(slot) => {
                let (head_rule, head) = slot.get();
                if *head == item.id {
                    return true;
                }
                if *head_rule == rule.index {
                    debug!(
                        "Leaving {} to the paging sequence headed by {}",
                        item.source_url, head
                    );
                } else {
                    warn!(
                        "{} (rule {}) writes to {} which the sequence of {} (rule {}) already owns; skipping it",
                        item.source_url,
                        rule.index,
                        self.relative_display(slot.key()),
                        head,
                        head_rule
                    );
                }
                false
            }
        }
    }

    fn relative_display(&self, path: &Path) -> String {
        path.strip_prefix(self.resolver.save_dir())
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Applies a terminal outcome to the report and logs progress
    fn tally(&self, update: impl FnOnce(&mut CrawlReport)) {
        let mut report = self.lock_report();
        update(&mut report);

        let processed = report.processed();
        if processed % PROGRESS_INTERVAL == 0 {
            let counts = self.frontier.counts();
            let rate = processed as f64 / self.started.elapsed().as_secs_f64().max(0.001);
            info!(
                "Progress: {} done, {} skipped, {} failed, {} pending, {:.2} items/sec",
                report.done,
                report.skipped,
                report.failed(),
                counts.pending + counts.in_flight,
                rate
            );
        }
    }

    fn lock_report(&self) -> std::sync::MutexGuard<'_, CrawlReport> {
        self.report.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Transient fetch failures and local write failures are worth another attempt
fn is_retryable(err: &SieveError) -> bool {
    match err {
        SieveError::Fetch(e) => e.is_transient(),
        SieveError::Store(e) => e.is_transient(),
        SieveError::Ledger(_) | SieveError::Io(_) => true,
        _ => false,
    }
}

fn parse_urls(urls: &[String]) -> Vec<Url> {
    urls.iter().filter_map(|u| Url::parse(u).ok()).collect()
}

fn log_fetch(resource: &RawResource, item: &CrawlItem) {
    if resource.final_url != resource.url {
        debug!("{} redirected to {}", resource.url, resource.final_url);
    }
    debug!(
        "Recorded {} ({} bytes, {})",
        item.id,
        resource.body.len(),
        resource.content_type.as_deref().unwrap_or("no content type")
    );
}
