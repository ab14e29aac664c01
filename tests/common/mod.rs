#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use runq::engine::SequentialExecutor;
use runq::exec::{ExecContext, RealExecutorBackend};
use runq::report::Reporter;
use runq::tracker::ProcessTracker;

pub use runq_test_utils::builders;
pub use runq_test_utils::{init_tracing, with_timeout};

/// Tracker backed by `tracker.json` inside `dir`.
pub fn temp_tracker(dir: &Path) -> Arc<ProcessTracker> {
    Arc::new(ProcessTracker::open(dir.join("tracker.json")).expect("open tracker"))
}

/// Real executor with a private tracker and a short grace period.
pub fn real_executor(
    dir: &Path,
    ctx: ExecContext,
) -> SequentialExecutor<RealExecutorBackend> {
    let reporter: Arc<dyn Reporter> = ctx.reporter.clone();
    let backend = RealExecutorBackend::new(ctx, temp_tracker(dir))
        .with_termination_timeouts(Duration::from_secs(2), Duration::from_secs(3));
    SequentialExecutor::new(backend, reporter)
}

/// Poll `cond` every 50ms until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
