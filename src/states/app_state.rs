use std::sync::Arc;

use crate::config::Config;
use crate::media::ObjectStore;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub media: Arc<dyn ObjectStore>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Store, media: Arc<dyn ObjectStore>, config: Config) -> Self {
        Self {
            store: Arc::new(store),
            media,
            config: Arc::new(config),
        }
    }
}
