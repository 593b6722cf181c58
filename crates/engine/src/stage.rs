use anyhow::Result;
use async_trait::async_trait;

use crate::{bus::Bus, promotion::Promoter};

/// One step of the pipeline. Stages mutate the bus in place.
///
/// Returning `Err` marks the delivery as failed and stops the remaining
/// stages of the chain; deferred feedback still runs.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, bus: &mut Bus) -> Result<()>;
}

/// Resolves the repository's stage list from its custom properties.
pub struct SelectPromoter {
    pub property: String,
}

#[async_trait]
impl Stage for SelectPromoter {
    fn name(&self) -> &'static str { "select_promoter" }

    async fn run(&self, bus: &mut Bus) -> Result<()> {
        let promoter = Promoter::from_properties(&bus.repository.custom_properties, &self.property);
        tracing::debug!("Using stages {promoter}");
        bus.context.set_promoter(promoter);
        Ok(())
    }
}
