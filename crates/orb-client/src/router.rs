use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use orb_directory::Directory;
use orb_protocol::{BackendApi, BackendPool};
use orb_types::{BackendId, ObjectId, OrbError, OrbResult, Stage};
use tracing::{debug, warn};

use crate::config::RetryPolicy;

/// Boxed future returned by a routed call.
pub type RpcFuture<T> = Pin<Box<dyn Future<Output = OrbResult<T>> + Send>>;

/// Sends calls for an identity to its master backend.
///
/// The caller's hint is tried first. `NotMaster` switches to the master it
/// names (or the directory's answer) without waiting; `LockTimeout` and
/// `Unavailable` back off and re-resolve through the directory. Every
/// other error is returned as is.
#[derive(Clone)]
pub struct Router {
    directory: Arc<dyn Directory>,
    backends: Arc<BackendPool>,
    retry: RetryPolicy,
    rpc_timeout: Duration,
}

impl Router {
    pub fn new(
        directory: Arc<dyn Directory>,
        backends: Arc<BackendPool>,
        retry: RetryPolicy,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            backends,
            retry,
            rpc_timeout,
        }
    }

    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    pub fn backends(&self) -> &Arc<BackendPool> {
        &self.backends
    }

    /// Run `op` against the master of `id`. Returns the result and the
    /// backend that produced it, which callers keep as their new hint.
    pub async fn call<T, F>(
        &self,
        id: ObjectId,
        hint: Option<BackendId>,
        op: F,
    ) -> OrbResult<(T, BackendId)>
    where
        F: Fn(Arc<dyn BackendApi>) -> RpcFuture<T>,
    {
        let mut target = match hint {
            Some(backend) => backend,
            None => self.directory.master_of(&id).await?,
        };
        let mut attempt = 1;
        loop {
            let result = self.once(target, &op).await;
            let error = match result {
                Ok(value) => return Ok((value, target)),
                Err(e) => e,
            };
            if !self.retry.allows_retry(attempt) {
                return Err(error);
            }
            target = match error {
                OrbError::NotMaster { master, .. } => {
                    debug!(%id, stale = %target, ?master, "re-resolving master");
                    match master {
                        Some(master) if master != target => master,
                        _ => self.directory.master_of(&id).await?,
                    }
                }
                e if e.is_retryable() => {
                    let delay = self.retry.backoff(attempt);
                    warn!(%id, %target, attempt, ?delay, error = %e, "retrying call");
                    tokio::time::sleep(delay).await;
                    self.directory.master_of(&id).await?
                }
                e => return Err(e),
            };
            attempt += 1;
        }
    }

    /// Run `op` once against a specific backend, bounded by the call
    /// timeout.
    pub async fn once<T, F>(&self, target: BackendId, op: &F) -> OrbResult<T>
    where
        F: Fn(Arc<dyn BackendApi>) -> RpcFuture<T>,
    {
        let api = self.backends.get(&target)?;
        match tokio::time::timeout(self.rpc_timeout, op(api)).await {
            Ok(result) => result,
            Err(_) => Err(OrbError::unavailable(
                target,
                Stage::Rpc,
                format!("no answer within {:?}", self.rpc_timeout),
            )),
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("backends", &self.backends.len())
            .field("retry", &self.retry)
            .field("rpc_timeout", &self.rpc_timeout)
            .finish()
    }
}
