// Scripted provider for tests
//
// Each call pops the next scripted outcome; once the script is exhausted the
// fallback output is returned. Calls are counted so tests can assert on the
// number of attempts that reached the provider.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use timeglow_core::{ProviderError, ProviderOutput, RestorationProvider, RestorationRequest};

/// Bytes returned by the default fallback
pub const FAKE_RESTORED_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nrestored";

pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ProviderOutput, ProviderError>>>,
    fallback: ProviderOutput,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    /// Always succeeds with a small PNG
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: ProviderOutput::Restored {
                data: FAKE_RESTORED_BYTES.to_vec(),
                content_type: "image/png".to_string(),
            },
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail with `error` `times` times before falling back to success
    pub fn failing(error: ProviderError, times: usize) -> Self {
        let provider = Self::new();
        provider.push_errors(error, times);
        provider
    }

    pub fn push(&self, outcome: Result<ProviderOutput, ProviderError>) {
        self.script.lock().push_back(outcome);
    }

    pub fn push_errors(&self, error: ProviderError, times: usize) {
        let mut script = self.script.lock();
        for _ in 0..times {
            script.push_back(Err(error.clone()));
        }
    }

    /// Sleep before answering, for exercising attempt timeouts
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RestorationProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn restore(
        &self,
        _request: RestorationRequest<'_>,
    ) -> Result<ProviderOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}
