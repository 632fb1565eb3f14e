use std::sync::Arc;

use herbtrace_core::operations::CoreConfig;
use herbtrace_core::store::TraceStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TraceStore>,
    pub config: CoreConfig,
}

impl AppState {
    pub fn new(store: Arc<dyn TraceStore>, config: CoreConfig) -> Arc<Self> {
        Arc::new(Self { store, config })
    }
}
