//! Progress tracking and callbacks for batch workflows.
//!
//! A batch reports once per finished item. Callbacks are shared between
//! worker threads and must be `Send + Sync`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

/// Progress information after one batch item finished.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Items finished so far, successful or not.
    pub completed: usize,
    /// Items in the batch.
    pub total: usize,
    /// Name of the item that just finished.
    pub item: String,
    /// Whether that item succeeded.
    pub succeeded: bool,
    /// Failed items so far.
    pub failures: usize,
    /// Time elapsed since start.
    pub elapsed: Duration,
    /// Estimated remaining time.
    pub estimated_remaining: Option<Duration>,
}

impl ProgressInfo {
    /// Create new progress information.
    pub fn new(completed: usize, total: usize, item: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            completed,
            total,
            item: item.into(),
            succeeded: true,
            failures: 0,
            elapsed,
            estimated_remaining: None,
        }
    }

    /// Calculate progress percentage. An empty batch is complete.
    pub fn progress_percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.completed as f64 / self.total as f64) * 100.0
        }
    }

    /// Calculate estimated remaining time.
    pub fn calculate_remaining(&mut self) {
        if self.completed > 0 {
            let avg_time_per_item = self.elapsed.as_secs_f64() / self.completed as f64;
            let remaining_items = self.total.saturating_sub(self.completed);
            self.estimated_remaining = Some(Duration::from_secs_f64(avg_time_per_item * remaining_items as f64));
        }
    }
}

/// Progress callback trait for monitoring a batch.
pub trait ProgressCallback: Send + Sync {
    /// Called after each item with progress information.
    fn on_progress(&self, info: &ProgressInfo);

    /// Called when the batch starts.
    fn on_start(&self, _total: usize) {
        // Default: no-op
    }

    /// Called once all items have finished.
    fn on_complete(&self, _info: &ProgressInfo) {
        // Default: no-op
    }

    /// Called when an item fails.
    fn on_error(&self, _item: &str, _error: &str) {
        // Default: no-op
    }
}

/// Console progress callback that logs to tracing.
#[derive(Debug, Clone)]
pub struct ConsoleProgressCallback {
    /// Log every n-th item.
    pub log_interval: usize,
}

impl Default for ConsoleProgressCallback {
    fn default() -> Self {
        Self { log_interval: 1 }
    }
}

impl ConsoleProgressCallback {
    /// Create a new console progress callback.
    pub fn new(log_interval: usize) -> Self {
        Self {
            log_interval: log_interval.max(1),
        }
    }
}

impl ProgressCallback for ConsoleProgressCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        if info.completed % self.log_interval == 0 || info.completed == info.total {
            let remaining = info
                .estimated_remaining
                .map(|d| format!("{:.1}s", d.as_secs_f64()))
                .unwrap_or_else(|| "N/A".to_string());

            tracing::info!(
                "[{}/{}] ({:.1}%) {} {} | Elapsed: {:.1}s | ETA: {}",
                info.completed,
                info.total,
                info.progress_percent(),
                info.item,
                if info.succeeded { "done" } else { "FAILED" },
                info.elapsed.as_secs_f64(),
                remaining
            );
        }
    }

    fn on_start(&self, total: usize) {
        tracing::info!("Batch started with {} item(s)", total);
    }

    fn on_complete(&self, info: &ProgressInfo) {
        tracing::info!(
            "Batch completed in {:.2}s: {} succeeded, {} failed",
            info.elapsed.as_secs_f64(),
            info.completed - info.failures,
            info.failures
        );
    }

    fn on_error(&self, item: &str, error: &str) {
        tracing::error!("{} failed: {}", item, error);
    }
}

/// Terminal progress bar.
#[derive(Clone)]
pub struct ProgressBarCallback {
    bar: ProgressBar,
}

impl ProgressBarCallback {
    pub fn new(description: &str) -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        bar.set_message(description.to_string());
        Self { bar }
    }

    /// Bar that draws nothing.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }
}

impl ProgressCallback for ProgressBarCallback {
    fn on_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
    }

    fn on_progress(&self, info: &ProgressInfo) {
        self.bar.set_position(info.completed as u64);
    }

    fn on_complete(&self, info: &ProgressInfo) {
        self.bar
            .finish_with_message(format!("{} succeeded, {} failed", info.completed - info.failures, info.failures));
    }

    fn on_error(&self, item: &str, _error: &str) {
        self.bar.set_message(format!("last failure: {}", item));
    }
}

/// History callback that records all progress information.
#[derive(Debug, Clone, Default)]
pub struct HistoryCallback {
    history: Arc<Mutex<Vec<ProgressInfo>>>,
    errors: Arc<Mutex<Vec<(String, String)>>>,
}

impl HistoryCallback {
    /// Create a new history callback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the recorded history.
    pub fn get_history(&self) -> Vec<ProgressInfo> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// `(item, error)` pairs in report order.
    pub fn get_errors(&self) -> Vec<(String, String)> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Clear the history.
    pub fn clear(&self) {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.errors.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl ProgressCallback for HistoryCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(info.clone());
    }

    fn on_error(&self, item: &str, error: &str) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((item.to_string(), error.to_string()));
    }
}

/// Progress tracker that manages multiple callbacks.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    /// Registered callbacks.
    callbacks: Vec<Arc<dyn ProgressCallback>>,
    state: Arc<TrackerState>,
}

#[derive(Default)]
struct TrackerState {
    start_time: Mutex<Option<Instant>>,
    total: AtomicUsize,
    completed: AtomicUsize,
    failures: AtomicUsize,
}

impl ProgressTracker {
    /// Create a new progress tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callback.
    pub fn add_callback(&mut self, callback: Arc<dyn ProgressCallback>) {
        self.callbacks.push(callback);
    }

    pub fn with_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.add_callback(callback);
        self
    }

    fn elapsed(&self) -> Duration {
        self.state
            .start_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// Start tracking a batch of `total` items.
    pub fn start(&self, total: usize) {
        *self.state.start_time.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        self.state.total.store(total, Ordering::SeqCst);
        self.state.completed.store(0, Ordering::SeqCst);
        self.state.failures.store(0, Ordering::SeqCst);
        for callback in &self.callbacks {
            callback.on_start(total);
        }
    }

    /// Record one finished item; `error` is set when it failed.
    pub fn item_finished(&self, item: &str, error: Option<&str>) {
        if let Some(error) = error {
            self.state.failures.fetch_add(1, Ordering::SeqCst);
            for callback in &self.callbacks {
                callback.on_error(item, error);
            }
        }
        let completed = self.state.completed.fetch_add(1, Ordering::SeqCst) + 1;

        let mut info = ProgressInfo::new(completed, self.state.total.load(Ordering::SeqCst), item, self.elapsed());
        info.succeeded = error.is_none();
        info.failures = self.state.failures.load(Ordering::SeqCst);
        info.calculate_remaining();

        for callback in &self.callbacks {
            callback.on_progress(&info);
        }
    }

    /// Complete tracking.
    pub fn complete(&self) {
        let mut info = ProgressInfo::new(
            self.state.completed.load(Ordering::SeqCst),
            self.state.total.load(Ordering::SeqCst),
            "",
            self.elapsed(),
        );
        info.failures = self.state.failures.load(Ordering::SeqCst);
        info.succeeded = info.failures == 0;

        for callback in &self.callbacks {
            callback.on_complete(&info);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_info() {
        let info = ProgressInfo::new(10, 100, "series_10", Duration::from_secs(10));
        assert_eq!(info.completed, 10);
        assert_eq!(info.progress_percent(), 10.0);
        assert_eq!(ProgressInfo::new(0, 0, "", Duration::ZERO).progress_percent(), 100.0);
    }

    #[test]
    fn test_progress_info_remaining() {
        let mut info = ProgressInfo::new(10, 100, "series_10", Duration::from_secs(10));
        info.calculate_remaining();
        assert_eq!(info.estimated_remaining, Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_history_callback() {
        let callback = HistoryCallback::new();
        callback.on_progress(&ProgressInfo::new(1, 10, "a", Duration::ZERO));
        callback.on_progress(&ProgressInfo::new(2, 10, "b", Duration::ZERO));

        let history = callback.get_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].item, "a");
        assert_eq!(history[1].completed, 2);
    }

    #[test]
    fn test_progress_tracker_counts_failures() {
        let history = Arc::new(HistoryCallback::new());
        let tracker = ProgressTracker::new()
            .with_callback(history.clone())
            .with_callback(Arc::new(ConsoleProgressCallback::default()))
            .with_callback(Arc::new(ProgressBarCallback::hidden()));

        tracker.start(3);
        tracker.item_finished("a", None);
        tracker.item_finished("b", Some("converter exited with status 1"));
        tracker.item_finished("c", None);
        tracker.complete();

        let records = history.get_history();
        assert_eq!(records.len(), 3);
        assert!(!records[1].succeeded);
        assert_eq!(records[2].failures, 1);
        assert_eq!(records[2].completed, 3);
        assert_eq!(history.get_errors(), vec![("b".to_string(), "converter exited with status 1".to_string())]);
    }
}
