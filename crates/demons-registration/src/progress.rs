//! Progress tracking and callbacks for demons registration.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Progress of one demons iteration.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Pyramid level (0 = finest).
    pub level: usize,
    /// Iteration within the level, starting at 1.
    pub iteration: usize,
    /// Iteration budget of the level.
    pub total_iterations: Option<usize>,
    /// Largest update magnitude (mm) over valid voxels.
    pub max_update: f64,
    /// Mean squared intensity difference between target and warped source.
    pub msd: f64,
    /// Time elapsed since start.
    pub elapsed: Duration,
    pub estimated_remaining: Option<Duration>,
}

impl ProgressInfo {
    pub fn new(
        level: usize,
        iteration: usize,
        total_iterations: Option<usize>,
        max_update: f64,
        msd: f64,
        elapsed: Duration,
    ) -> Self {
        Self {
            level,
            iteration,
            total_iterations,
            max_update,
            msd,
            elapsed,
            estimated_remaining: None,
        }
    }

    /// Calculate progress percentage within the level.
    pub fn progress_percent(&self) -> Option<f64> {
        self.total_iterations
            .map(|total| (self.iteration as f64 / total as f64) * 100.0)
    }

    /// Estimate the time left in the level from the mean iteration time.
    pub fn calculate_remaining(&mut self, level_elapsed: Duration) {
        if let Some(total) = self.total_iterations {
            if self.iteration > 0 {
                let per_iteration = level_elapsed.as_secs_f64() / self.iteration as f64;
                let remaining = total.saturating_sub(self.iteration);
                self.estimated_remaining = Some(Duration::from_secs_f64(per_iteration * remaining as f64));
            }
        }
    }
}

/// Progress callback trait for monitoring registration progress.
pub trait ProgressCallback: Send + Sync {
    /// Called after every iteration.
    fn on_progress(&self, info: &ProgressInfo);

    fn on_start(&self) {}

    /// Called when a pyramid level is finished.
    fn on_level_complete(&self, _level: usize, _info: &ProgressInfo) {}

    /// Called when registration completes successfully.
    fn on_complete(&self, _elapsed: Duration) {}

    /// Called when registration fails.
    fn on_error(&self, _error: &str) {}
}

/// Console progress callback that logs to tracing.
#[derive(Debug, Clone)]
pub struct ConsoleProgressCallback {
    /// Log interval (iterations).
    pub log_interval: usize,
}

impl Default for ConsoleProgressCallback {
    fn default() -> Self {
        Self { log_interval: 10 }
    }
}

impl ConsoleProgressCallback {
    pub fn new(log_interval: usize) -> Self {
        Self {
            log_interval: log_interval.max(1),
        }
    }
}

impl ProgressCallback for ConsoleProgressCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        if info.iteration % self.log_interval == 0 || info.total_iterations == Some(info.iteration) {
            let remaining = info
                .estimated_remaining
                .map(|d| format!("{:.2}s", d.as_secs_f64()))
                .unwrap_or_else(|| "N/A".to_string());

            tracing::info!(
                "Level {} iter {}/{} ({:.1}%) | max update: {:.6} mm | MSD: {:.6} | Elapsed: {:.2}s | ETA: {}",
                info.level,
                info.iteration,
                info.total_iterations
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "?".to_string()),
                info.progress_percent().unwrap_or(0.0),
                info.max_update,
                info.msd,
                info.elapsed.as_secs_f64(),
                remaining
            );
        }
    }

    fn on_start(&self) {
        tracing::info!("Demons registration started");
    }

    fn on_level_complete(&self, level: usize, info: &ProgressInfo) {
        tracing::info!(
            "Level {} finished after {} iteration(s), MSD {:.6}",
            level,
            info.iteration,
            info.msd
        );
    }

    fn on_complete(&self, elapsed: Duration) {
        tracing::info!("Demons registration completed in {:.2}s", elapsed.as_secs_f64());
    }

    fn on_error(&self, error: &str) {
        tracing::error!("Demons registration failed: {}", error);
    }
}

/// History callback that records all progress information.
#[derive(Debug, Clone, Default)]
pub struct HistoryCallback {
    history: Arc<Mutex<Vec<ProgressInfo>>>,
}

impl HistoryCallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the recorded history.
    pub fn get_history(&self) -> Vec<ProgressInfo> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// Recorded iterations of one level.
    pub fn level_history(&self, level: usize) -> Vec<ProgressInfo> {
        self.get_history().into_iter().filter(|i| i.level == level).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut history) = self.history.lock() {
            history.clear();
        }
    }
}

impl ProgressCallback for HistoryCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        if let Ok(mut history) = self.history.lock() {
            history.push(info.clone());
        }
    }
}

/// Dispatches progress to registered callbacks.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    callbacks: Vec<Arc<dyn ProgressCallback>>,
    start_time: Option<Instant>,
    level_start: Option<Instant>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_callback(&mut self, callback: Arc<dyn ProgressCallback>) {
        self.callbacks.push(callback);
    }

    pub fn start(&mut self) {
        self.start_time = Some(Instant::now());
        for callback in &self.callbacks {
            callback.on_start();
        }
    }

    pub fn start_level(&mut self) {
        self.level_start = Some(Instant::now());
    }

    /// Report an iteration and return what was reported.
    pub fn update(
        &self,
        level: usize,
        iteration: usize,
        total_iterations: usize,
        max_update: f64,
        msd: f64,
    ) -> ProgressInfo {
        let elapsed = self.start_time.map(|t| t.elapsed()).unwrap_or(Duration::ZERO);
        let mut info = ProgressInfo::new(level, iteration, Some(total_iterations), max_update, msd, elapsed);
        info.calculate_remaining(self.level_start.map(|t| t.elapsed()).unwrap_or(elapsed));
        for callback in &self.callbacks {
            callback.on_progress(&info);
        }
        info
    }

    pub fn complete_level(&self, level: usize, info: &ProgressInfo) {
        for callback in &self.callbacks {
            callback.on_level_complete(level, info);
        }
    }

    pub fn complete(&self) -> Duration {
        let elapsed = self.start_time.map(|t| t.elapsed()).unwrap_or(Duration::ZERO);
        for callback in &self.callbacks {
            callback.on_complete(elapsed);
        }
        elapsed
    }

    /// Report error.
    pub fn error(&self, error: &str) {
        for callback in &self.callbacks {
            callback.on_error(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_info() {
        let info = ProgressInfo::new(1, 10, Some(40), 0.5, 2.0, Duration::from_secs(10));
        assert_eq!(info.iteration, 10);
        assert_eq!(info.progress_percent(), Some(25.0));
    }

    #[test]
    fn test_progress_info_remaining() {
        let mut info = ProgressInfo::new(0, 10, Some(20), 0.5, 0.0, Duration::from_secs(10));
        info.calculate_remaining(Duration::from_secs(10));
        assert_eq!(info.estimated_remaining, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_history_callback() {
        let callback = HistoryCallback::new();
        callback.on_progress(&ProgressInfo::new(2, 1, Some(10), 0.5, 1.0, Duration::ZERO));
        callback.on_progress(&ProgressInfo::new(1, 1, Some(10), 0.4, 0.5, Duration::ZERO));

        let history = callback.get_history();
        assert_eq!(history.len(), 2);
        assert_eq!(callback.level_history(1).len(), 1);
        callback.clear();
        assert!(callback.get_history().is_empty());
    }

    #[test]
    fn test_progress_tracker() {
        let history = Arc::new(HistoryCallback::new());
        let mut tracker = ProgressTracker::new();
        tracker.add_callback(history.clone());
        tracker.start();
        tracker.start_level();
        tracker.update(0, 1, 10, 0.5, 1.0);
        let info = tracker.update(0, 2, 10, 0.25, 0.5);
        tracker.complete_level(0, &info);
        tracker.complete();
        assert_eq!(history.get_history().len(), 2);
        assert_eq!(info.max_update, 0.25);
    }
}
