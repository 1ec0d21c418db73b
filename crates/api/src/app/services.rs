use std::sync::Arc;

use circulation_infra::{
    action_dispatcher::ActionDispatcher,
    config::{CirculationConfig, ConfigError},
    loan_store::InMemoryLoanStore,
};
use circulation_loans::ItemLocations;

/// Process-wide services shared by every handler.
#[derive(Debug)]
pub struct AppServices {
    dispatcher: ActionDispatcher<Arc<InMemoryLoanStore>>,
}

impl AppServices {
    pub fn dispatcher(&self) -> &ActionDispatcher<Arc<InMemoryLoanStore>> {
        &self.dispatcher
    }
}

/// Wire the loan store and the validated transition engine.
pub fn build_services(
    config: &CirculationConfig,
    locations: Arc<dyn ItemLocations>,
) -> Result<AppServices, ConfigError> {
    let engine = config.build_engine(locations)?;
    tracing::info!(
        states = engine.table().states().len(),
        transitions = engine.table().definitions().len(),
        "transition table loaded"
    );

    Ok(AppServices {
        dispatcher: ActionDispatcher::new(Arc::new(InMemoryLoanStore::new()), engine),
    })
}
