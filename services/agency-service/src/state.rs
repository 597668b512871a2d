use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio_postgres::Client;

use crate::config::ServiceConfig;
use crate::dispatch::PostingDispatcher;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Client>>,
    pub config: Arc<ServiceConfig>,
    /// Pinged after writes so dashboard streams refresh early.
    pub updates: broadcast::Sender<()>,
    pub posting: PostingDispatcher,
}
