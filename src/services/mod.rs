pub mod dispatch;
pub mod packing;
pub mod production;
pub mod qc;

use std::future::Future;

use tracing::warn;

use crate::errors::ServiceError;

/// Runs `op` again, up to `attempts` times in total, while it fails with an
/// optimistic version conflict. Everything else surfaces immediately; the
/// last conflict surfaces too.
pub(crate) async fn with_conflict_retry<T, F, Fut>(
    op_name: &'static str,
    attempts: u32,
    mut op: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Err(e) if e.is_retryable() && attempt < attempts => {
                warn!(
                    operation = op_name,
                    attempt,
                    error = %e,
                    "version conflict; retrying operation"
                );
            }
            other => return other,
        }
    }
}
