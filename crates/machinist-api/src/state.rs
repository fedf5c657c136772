use std::sync::Arc;

use machinist_reconciler::Reconciler;
use machinist_store::SpecStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SpecStore>,
    pub reconciler: Arc<Reconciler>,
}
