pub mod auth;
pub mod chats;
pub mod dispatch;
pub mod error;
pub mod media;
pub mod messages;
pub mod middleware;
pub mod push;
pub mod service;
mod views;

use std::sync::Arc;

use courier_db::{Database, StoreResult};
use courier_types::error::ChatError;
use tracing::error;

/// Run a blocking store call off the async runtime.
pub(crate) async fn with_db<F, T>(db: &Arc<Database>, f: F) -> Result<T, ChatError>
where
    F: FnOnce(&Database) -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ChatError::Storage(e.to_string())
        })?
        .map_err(ChatError::from)
}
