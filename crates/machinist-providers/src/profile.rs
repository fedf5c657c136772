use async_trait::async_trait;
use machinist_domain::{ObservedStatus, Profile};

use crate::error::ProviderError;
use crate::provider::ResourceProvider;

/// Profiles are configuration-only records; this provider validates them and
/// reports whether they are usable. It never touches the host (§4.4, §4.6).
#[derive(Debug, Default)]
pub struct ProfileProvider;

impl ProfileProvider {
    pub fn new() -> Self {
        ProfileProvider
    }
}

#[async_trait]
impl ResourceProvider for ProfileProvider {
    type Spec = Profile;

    async fn validate(&self, spec: &Profile) -> Result<bool, ProviderError> {
        Ok(spec.is_usable())
    }

    async fn status(&self, spec: &Profile) -> Result<ObservedStatus, ProviderError> {
        Ok(if spec.is_usable() {
            ObservedStatus::Present
        } else {
            ObservedStatus::Absent
        })
    }

    async fn present(&self, _spec: &Profile) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn absent(&self, _spec: &Profile) -> Result<(), ProviderError> {
        Ok(())
    }
}
