use super::progress::ProgressSample;

/// Run lifecycle callbacks. Invocation order is guaranteed: `on_started`
/// precedes any `on_progress`, and every progress call precedes the
/// terminal `on_completed`/`on_failed`. Progress callbacks arrive in the
/// order the bytes were read from the progress channel, never coalesced.
pub trait RunObserver: Send + Sync {
    fn on_started(&self, _program: &str, _args: &[String]) {}

    fn on_progress(&self, _sample: &ProgressSample) {}

    fn on_completed(&self) {}

    fn on_failed(&self, _error_text: &str) {}
}

/// Observer that ignores every callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}
