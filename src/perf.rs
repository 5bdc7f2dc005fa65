#[cfg(feature = "perf")]
use std::time::Instant;

/// Lightweight stage-timing instrumentation for the image pipeline.
///
/// Enable with `--features perf`. Emits `tracing::info!` events with
/// target="perf" when the span drops.
#[cfg(feature = "perf")]
pub struct PerfSpan {
    stage: &'static str,
    start: Instant,
}

#[cfg(feature = "perf")]
impl PerfSpan {
    #[inline]
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            start: Instant::now(),
        }
    }
}

#[cfg(feature = "perf")]
impl Drop for PerfSpan {
    fn drop(&mut self) {
        let ms = self.start.elapsed().as_secs_f64() * 1000.0;
        tracing::info!(target: "perf", stage = self.stage, ms = ms);
    }
}

#[cfg(not(feature = "perf"))]
pub struct PerfSpan;

#[cfg(not(feature = "perf"))]
impl PerfSpan {
    #[inline]
    pub fn new(_stage: &'static str) -> Self {
        PerfSpan
    }
}

#[macro_export]
macro_rules! perf_scope {
    ($stage:expr) => {
        $crate::perf::PerfSpan::new($stage)
    };
}
