//! Bounded retry around directory operations
//!
//! Each attempt opens a fresh connection, binds as the service account,
//! runs the operation and unbinds. A failed connect or bind counts as a
//! failed attempt.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use spsh_core::config::RetryConfigSection;
use spsh_core::DEFAULT_RETRIES;
use tracing::{debug, error, warn};

use crate::connection::{DirectoryConnection, DirectoryConnector};
use crate::error::DirectoryResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Attempt n waits n * delay before attempt n + 1
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_RETRIES,
            delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfigSection) -> Self {
        Self {
            max_retries: config.retries(),
            delay: config.retry_delay(),
        }
    }
}

/// Service account credentials used for every bind
#[derive(Clone)]
pub struct BindCredentials {
    pub bind_dn: String,
    pub password: String,
}

impl std::fmt::Debug for BindCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindCredentials")
            .field("bind_dn", &self.bind_dn)
            .field("password", &"***")
            .finish()
    }
}

pub struct RetryingExecutor {
    connector: Arc<dyn DirectoryConnector>,
    credentials: BindCredentials,
    policy: RetryPolicy,
}

impl RetryingExecutor {
    pub fn new(
        connector: Arc<dyn DirectoryConnector>,
        credentials: BindCredentials,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            connector,
            credentials,
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `operation` with the configured retry bound
    pub async fn execute<T, F, Fut>(&self, operation: F) -> DirectoryResult<T>
    where
        F: Fn(Arc<dyn DirectoryConnection>) -> Fut,
        Fut: Future<Output = DirectoryResult<T>>,
    {
        self.execute_with_retry(operation, None).await
    }

    /// Run `operation` up to `retries + 1` times. Only input the directory
    /// can never accept is returned after the attempt that hit it.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        operation: F,
        retries: Option<u32>,
    ) -> DirectoryResult<T>
    where
        F: Fn(Arc<dyn DirectoryConnection>) -> Fut,
        Fut: Future<Output = DirectoryResult<T>>,
    {
        let attempts = retries.unwrap_or(self.policy.max_retries) + 1;
        let mut attempt = 1;

        loop {
            match self.attempt(&operation).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(attempt, error = %e, "Attempt {} failed", attempt);

                    if !e.is_retryable() {
                        debug!(code = e.code(), "Not retrying {}", e.code());
                        return Err(e);
                    }
                    if attempt >= attempts {
                        error!("All {} attempts failed, giving up", attempts);
                        return Err(e);
                    }

                    let delay = self.policy.delay * attempt;
                    if !delay.is_zero() {
                        debug!("Retrying in {:?}", delay);
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt<T, F, Fut>(&self, operation: &F) -> DirectoryResult<T>
    where
        F: Fn(Arc<dyn DirectoryConnection>) -> Fut,
        Fut: Future<Output = DirectoryResult<T>>,
    {
        let connection = self.connector.connect().await?;

        let outcome = match connection
            .simple_bind(&self.credentials.bind_dn, &self.credentials.password)
            .await
        {
            Ok(()) => operation(connection.clone()).await,
            Err(e) => Err(e),
        };

        if let Err(e) = connection.unbind().await {
            debug!(error = %e, "Unbind failed");
        }

        outcome
    }
}
