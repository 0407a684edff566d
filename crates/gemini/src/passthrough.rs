// Passthrough adapter
//
// Returns the original image reference as the "restored" result. Only built
// when RESTORATION_PROVIDER=passthrough; every call is logged at warn so the
// mode is never mistaken for real restoration.

use async_trait::async_trait;
use timeglow_core::{ProviderError, ProviderOutput, RestorationProvider, RestorationRequest};
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct PassthroughProvider;

impl PassthroughProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RestorationProvider for PassthroughProvider {
    fn name(&self) -> &str {
        "passthrough"
    }

    async fn restore(
        &self,
        request: RestorationRequest<'_>,
    ) -> Result<ProviderOutput, ProviderError> {
        warn!(
            original_ref = request.original_ref,
            "passthrough provider: returning the original image unmodified"
        );
        Ok(ProviderOutput::Reference(request.original_ref.to_string()))
    }
}
