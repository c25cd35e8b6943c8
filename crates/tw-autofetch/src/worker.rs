//! Background fetch worker
//!
//! Two FIFO queues (image-class and audio/video-class) share one seen-set.
//! Each queue drains in batches: pop up to `base_limit`, and if what is left
//! is at or below `drain_threshold` take the rest too. Every request in a
//! batch settles before the next batch; a cooldown separates batches while
//! the queue is non-empty. Failures are logged and dropped, never retried.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use futures::future::{join, join_all, LocalBoxFuture};
use tw_core::srcset::split_srcset;
use tw_core::{css::extract_css_urls, Modifier};

use crate::protocol::{Values, WorkerInit, WorkerMessage};
use crate::resolve::Resolver;

/// Error type for a single preservation fetch.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP status {0}")]
    Status(u16),
}

/// Issues one request. The future must not borrow the fetcher.
pub trait Fetcher {
    fn fetch(&self, url: String) -> LocalBoxFuture<'static, Result<(), FetchError>>;
}

/// Cooldown timer.
pub trait Timer {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;
}

// =============================================================================
// Configuration
// =============================================================================

/// Batch shape for one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainLimits {
    pub base_limit: usize,
    pub drain_threshold: usize,
}

/// Tuning for both queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoFetchConfig {
    pub image: DrainLimits,
    pub media: DrainLimits,
    pub cooldown: Duration,
}

impl Default for AutoFetchConfig {
    fn default() -> Self {
        Self {
            image: DrainLimits {
                base_limit: 30,
                drain_threshold: 10,
            },
            media: DrainLimits {
                base_limit: 5,
                drain_threshold: 5,
            },
            cooldown: Duration::from_secs(2),
        }
    }
}

// =============================================================================
// Queues
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Image,
    Media,
}

impl QueueKind {
    /// Queue for a modifier code; unknown codes are image-class.
    pub fn for_modifier(code: &str) -> Self {
        match Modifier::try_from(code) {
            Ok(m) if m.is_audio_video() => Self::Media,
            _ => Self::Image,
        }
    }
}

#[derive(Debug)]
struct FetchQueue {
    limits: DrainLimits,
    items: VecDeque<String>,
    draining: bool,
}

impl FetchQueue {
    fn new(limits: DrainLimits) -> Self {
        Self {
            limits,
            items: VecDeque::new(),
            draining: false,
        }
    }

    fn next_batch(&mut self) -> Vec<String> {
        let take = self.limits.base_limit.min(self.items.len());
        let mut batch: Vec<String> = self.items.drain(..take).collect();
        if self.items.len() <= self.limits.drain_threshold {
            batch.extend(self.items.drain(..));
        }
        batch
    }
}

/// What one drain run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Size of each batch, in order.
    pub batches: Vec<usize>,
    pub cooldowns: usize,
    pub failures: usize,
}

#[derive(Debug)]
struct WorkerState {
    seen: HashSet<String>,
    image: FetchQueue,
    media: FetchQueue,
    terminated: bool,
}

impl WorkerState {
    fn queue(&mut self, kind: QueueKind) -> &mut FetchQueue {
        match kind {
            QueueKind::Image => &mut self.image,
            QueueKind::Media => &mut self.media,
        }
    }
}

// =============================================================================
// Worker
// =============================================================================

/// The auto-fetch worker. Single-threaded; drains run as local futures.
pub struct AutoFetchWorker<F: Fetcher, T: Timer> {
    fetcher: F,
    timer: T,
    resolver: Resolver,
    config: AutoFetchConfig,
    state: RefCell<WorkerState>,
}

impl<F: Fetcher, T: Timer> AutoFetchWorker<F, T> {
    pub fn new(init: &WorkerInit, config: AutoFetchConfig, fetcher: F, timer: T) -> Self {
        Self {
            fetcher,
            timer,
            resolver: Resolver::new(init),
            config,
            state: RefCell::new(WorkerState {
                seen: HashSet::new(),
                image: FetchQueue::new(config.image),
                media: FetchQueue::new(config.media),
                terminated: false,
            }),
        }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn queued(&self, kind: QueueKind) -> usize {
        self.state.borrow_mut().queue(kind).items.len()
    }

    /// Add `url` unless it was seen before. Returns whether it was queued.
    pub fn enqueue(&self, kind: QueueKind, url: String) -> bool {
        if url.starts_with("data:") {
            return false;
        }
        let mut state = self.state.borrow_mut();
        if state.terminated || !state.seen.insert(url.clone()) {
            return false;
        }
        state.queue(kind).items.push_back(url);
        true
    }

    /// Queue everything a message names. Returns the queues that grew.
    pub fn accept(&self, msg: WorkerMessage) -> Vec<QueueKind> {
        let mut grown = Vec::new();
        let mut add = |kind: QueueKind, url: String| {
            if self.enqueue(kind, url) && !grown.contains(&kind) {
                grown.push(kind);
            }
        };

        match msg {
            WorkerMessage::FetchAll { values } => {
                for url in values {
                    add(QueueKind::Image, url);
                }
            }
            WorkerMessage::Values(values) => self.accept_values(values, &mut add),
        }
        grown
    }

    fn accept_values(&self, values: Values, add: &mut dyn FnMut(QueueKind, String)) {
        let image_mod = Modifier::Image.as_str();
        for css in &values.media {
            for url in extract_css_urls(css) {
                if let Some(url) = self.resolver.resolve(url, image_mod, None, None) {
                    add(QueueKind::Image, url);
                }
            }
        }
        for entry in values.src.into_vec() {
            if let Some(url) = self.resolver.resolve(&entry.value, &entry.modifier, None, None) {
                add(QueueKind::for_modifier(&entry.modifier), url);
            }
        }
        for entry in values.srcset.into_vec() {
            let kind = QueueKind::for_modifier(&entry.modifier);
            for candidate in split_srcset(&entry.value) {
                let resolved = self.resolver.resolve(
                    candidate.url,
                    &entry.modifier,
                    entry.tag_src.as_deref(),
                    entry.doc_base_uri.as_deref(),
                );
                if let Some(url) = resolved {
                    add(kind, url);
                }
            }
        }
    }

    /// Queue a message and drain whatever it added.
    pub async fn handle(&self, msg: WorkerMessage) -> (DrainReport, DrainReport) {
        let grown = self.accept(msg);
        let image = async {
            if grown.contains(&QueueKind::Image) {
                self.drain(QueueKind::Image).await
            } else {
                DrainReport::default()
            }
        };
        let media = async {
            if grown.contains(&QueueKind::Media) {
                self.drain(QueueKind::Media).await
            } else {
                DrainReport::default()
            }
        };
        join(image, media).await
    }

    /// Drain `kind` until empty. A drain already running for the same queue
    /// picks up new entries itself, so a second call returns immediately.
    pub async fn drain(&self, kind: QueueKind) -> DrainReport {
        let mut report = DrainReport::default();
        {
            let mut state = self.state.borrow_mut();
            let queue = state.queue(kind);
            if queue.draining {
                return report;
            }
            queue.draining = true;
        }

        loop {
            let batch = {
                let mut state = self.state.borrow_mut();
                if state.terminated {
                    break;
                }
                state.queue(kind).next_batch()
            };
            if batch.is_empty() {
                break;
            }

            log::debug!("auto-fetch {:?}: batch of {}", kind, batch.len());
            report.batches.push(batch.len());
            let results = join_all(batch.into_iter().map(|url| self.fetcher.fetch(url))).await;
            for err in results.into_iter().filter_map(Result::err) {
                log::debug!("auto-fetch failed: {}", err);
                report.failures += 1;
            }

            let more = {
                let mut state = self.state.borrow_mut();
                !state.terminated && !state.queue(kind).items.is_empty()
            };
            if !more {
                break;
            }
            report.cooldowns += 1;
            self.timer.sleep(self.config.cooldown).await;
        }

        self.state.borrow_mut().queue(kind).draining = false;
        report
    }

    /// Stop accepting work and abandon pending batches. In-flight requests
    /// are left to settle on their own.
    pub fn terminate(&self) {
        let mut state = self.state.borrow_mut();
        state.terminated = true;
        state.image.items.clear();
        state.media.items.clear();
    }

    pub fn is_terminated(&self) -> bool {
        self.state.borrow().terminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{SrcEntry, SrcsetEntry};
    use futures::executor::block_on;
    use futures::future::{ready, FutureExt};
    use std::cell::Cell;
    use std::rc::Rc;

    const PREFIX: &str = "http://localhost:8080/live/20180803160549";

    #[derive(Default, Clone)]
    struct MockFetcher {
        calls: Rc<RefCell<Vec<String>>>,
    }

    impl Fetcher for MockFetcher {
        fn fetch(&self, url: String) -> LocalBoxFuture<'static, Result<(), FetchError>> {
            let fail = url.contains("fail");
            self.calls.borrow_mut().push(url);
            let result = if fail { Err(FetchError::Status(404)) } else { Ok(()) };
            ready(result).boxed_local()
        }
    }

    #[derive(Default, Clone)]
    struct MockTimer {
        sleeps: Rc<Cell<u32>>,
    }

    impl Timer for MockTimer {
        fn sleep(&self, _duration: Duration) -> LocalBoxFuture<'static, ()> {
            self.sleeps.set(self.sleeps.get() + 1);
            ready(()).boxed_local()
        }
    }

    fn worker() -> (AutoFetchWorker<MockFetcher, MockTimer>, MockTimer) {
        let timer = MockTimer::default();
        let init = WorkerInit {
            prefix: PREFIX.into(),
            modifier: "mp_".into(),
        };
        let w = AutoFetchWorker::new(&init, AutoFetchConfig::default(), MockFetcher::default(), timer.clone());
        (w, timer)
    }

    fn fill(w: &AutoFetchWorker<MockFetcher, MockTimer>, kind: QueueKind, n: usize) {
        for i in 0..n {
            assert!(w.enqueue(kind, format!("{PREFIX}im_/https://tests.wombat.io/{i}.png")));
        }
    }

    #[test]
    fn test_two_batches_with_cooldown() {
        let (w, timer) = worker();
        fill(&w, QueueKind::Image, 45);
        let report = block_on(w.drain(QueueKind::Image));
        assert_eq!(report.batches, vec![30, 15]);
        assert_eq!(report.cooldowns, 1);
        assert_eq!(timer.sleeps.get(), 1);
        assert_eq!(w.fetcher().calls.borrow().len(), 45);
        assert_eq!(w.queued(QueueKind::Image), 0);
    }

    #[test]
    fn test_small_remainder_drained_in_same_batch() {
        let (w, timer) = worker();
        fill(&w, QueueKind::Image, 35);
        let report = block_on(w.drain(QueueKind::Image));
        assert_eq!(report.batches, vec![35]);
        assert_eq!(report.cooldowns, 0);
        assert_eq!(timer.sleeps.get(), 0);
    }

    #[test]
    fn test_media_limits() {
        let (w, _) = worker();
        fill(&w, QueueKind::Media, 12);
        let report = block_on(w.drain(QueueKind::Media));
        // 5 leaves 7 > 5; 5 more leaves 2 <= 5, drained with them
        assert_eq!(report.batches, vec![5, 7]);
        assert_eq!(report.cooldowns, 1);
    }

    #[test]
    fn test_dedupe_and_data_urls() {
        let (w, _) = worker();
        assert!(w.enqueue(QueueKind::Image, "https://a/x.png".into()));
        assert!(!w.enqueue(QueueKind::Image, "https://a/x.png".into()));
        assert!(!w.enqueue(QueueKind::Media, "https://a/x.png".into()));
        assert!(!w.enqueue(QueueKind::Image, "data:image/gif;base64,R0lGOD".into()));
        assert_eq!(w.queued(QueueKind::Image), 1);
        assert_eq!(w.queued(QueueKind::Media), 0);
    }

    #[test]
    fn test_failures_do_not_abort_batch() {
        let (w, _) = worker();
        w.enqueue(QueueKind::Image, "https://a/fail.png".into());
        w.enqueue(QueueKind::Image, "https://a/ok.png".into());
        let report = block_on(w.drain(QueueKind::Image));
        assert_eq!(report.failures, 1);
        assert_eq!(w.fetcher().calls.borrow().len(), 2);
    }

    #[test]
    fn test_values_message_routes_by_modifier() {
        let (w, _) = worker();
        let mut values = Values::default();
        values.src.push(SrcEntry {
            value: format!("{PREFIX}oe_/https://tests.wombat.io/v.mp4"),
            modifier: "oe_".into(),
        });
        values.srcset.push(SrcsetEntry {
            value: "a.png 1x, b.png 2x".into(),
            modifier: "im_".into(),
            tag_src: Some("https://tests.wombat.io/img/x.png".into()),
            doc_base_uri: None,
        });
        values
            .media
            .push("@media (min-width: 600px) { div { background: url(https://tests.wombat.io/bg.png) } }".into());

        let grown = w.accept(WorkerMessage::Values(values));
        assert!(grown.contains(&QueueKind::Image));
        assert!(grown.contains(&QueueKind::Media));
        assert_eq!(w.queued(QueueKind::Media), 1);
        assert_eq!(w.queued(QueueKind::Image), 3);

        let (image, media) = block_on(w.handle(WorkerMessage::FetchAll { values: vec![] }));
        assert!(image.batches.is_empty() && media.batches.is_empty());

        block_on(w.drain(QueueKind::Image));
        let calls = w.fetcher().calls.borrow();
        assert!(calls.contains(&format!("{PREFIX}im_/https://tests.wombat.io/img/a.png")));
        assert!(calls.contains(&format!("{PREFIX}im_/https://tests.wombat.io/bg.png")));
    }

    #[test]
    fn test_fetch_all_verbatim() {
        let (w, _) = worker();
        let (image, _) = block_on(w.handle(WorkerMessage::FetchAll {
            values: vec!["https://a.example/1".into(), "https://a.example/1".into()],
        }));
        assert_eq!(image.batches, vec![1]);
        assert_eq!(*w.fetcher().calls.borrow(), vec!["https://a.example/1".to_string()]);
    }

    #[test]
    fn test_terminate() {
        let (w, _) = worker();
        fill(&w, QueueKind::Image, 3);
        w.terminate();
        assert!(w.is_terminated());
        assert_eq!(block_on(w.drain(QueueKind::Image)).batches, Vec::<usize>::new());
        assert!(!w.enqueue(QueueKind::Image, "https://a/new".into()));
    }
}
