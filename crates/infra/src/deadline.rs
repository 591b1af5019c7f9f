use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{EngineError, EngineResult};

/// Run `fut` under `limit`. An elapsed deadline is reported as `Internal`;
/// whatever the future already wrote stays written.
pub(crate) async fn with_deadline<T, F>(operation: &'static str, limit: Duration, fut: F) -> EngineResult<T>
where
    F: Future<Output = EngineResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, timeout_ms = limit.as_millis() as u64, "deadline exceeded");
            Err(EngineError::internal(format!("deadline exceeded: {operation}")))
        }
    }
}
