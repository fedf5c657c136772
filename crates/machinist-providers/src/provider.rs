use async_trait::async_trait;
use machinist_domain::ObservedStatus;

use crate::error::ProviderError;

/// Common contract every resource provider implements (§4.4).
///
/// Construction and cross-provider wiring (the original's `init(config,
/// registry)` step) happen in [`crate::registry::ProviderRegistry`]'s
/// two-phase build rather than through a trait method here: each provider
/// is a plain struct built with the dependencies it needs, which is the
/// more natural shape in a language with ownership — there is no
/// "construct first, wire later" mutable-self step to model.
#[async_trait]
pub trait ResourceProvider: Send + Sync + 'static {
    type Spec: Sync;

    /// Cheap structural checks beyond what the schema already enforces.
    async fn validate(&self, spec: &Self::Spec) -> Result<bool, ProviderError>;

    /// Read-only. Must never mutate host state.
    async fn status(&self, spec: &Self::Spec) -> Result<ObservedStatus, ProviderError>;

    /// Idempotent: post-condition is `status(spec) == Present` plus any
    /// dependent configuration in place.
    async fn present(&self, spec: &Self::Spec) -> Result<(), ProviderError>;

    /// Idempotent: post-condition is `status(spec) == Absent` with all
    /// residuals removed.
    async fn absent(&self, spec: &Self::Spec) -> Result<(), ProviderError>;
}
