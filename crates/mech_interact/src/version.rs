//! Detection of the contract dialect.
//!
//! Without the marketplace the deployment is legacy direct and no contract is
//! read. Otherwise the checks run concurrently and are walked in
//! [`Dialect::PROBE_ORDER`]: the first positive answer selects its dialect and
//! a failing check is skipped. Detection is inconclusive only when every check
//! failed; when at least one answered "no" and none said "yes" the deployment
//! is legacy direct.

use crate::contracts::ContractApi;
use crate::dialect::{handler_for, Dialect, DialectHandler};
use crate::retry::RetryPolicy;
use crate::{MechInteractError, MechInteractResult};
use futures::future::join_all;
use mech_config::MechInteractConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Detects and caches the dialect of the configured deployment.
pub struct VersionDetector {
    contracts: Arc<dyn ContractApi>,
    config: Arc<MechInteractConfig>,
    retry: RetryPolicy,
    cache: Mutex<Option<Dialect>>,
}

impl VersionDetector {
    /// Creates a detector with an empty cache.
    pub fn new(contracts: Arc<dyn ContractApi>, config: Arc<MechInteractConfig>) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            contracts,
            config,
            retry,
            cache: Mutex::new(None),
        }
    }

    /// Cached dialect, if detection already ran.
    pub fn cached(&self) -> Option<Dialect> {
        *self.cache.lock()
    }

    /// Seeds the cache, e.g. from an agreed state.
    pub fn remember(&self, dialect: Dialect) {
        *self.cache.lock() = Some(dialect);
    }

    /// Drops the cached dialect; the next call to [`detect`](Self::detect) reads the contracts again.
    pub fn invalidate(&self) {
        if self.cache.lock().take().is_some() {
            info!("Dialect cache invalidated");
        }
    }

    /// Returns the cached dialect or detects it from the deployment.
    ///
    /// Inconclusive detections are retried; when the retries run out the error is a
    /// `DetectionFailure`.
    pub async fn detect(&self) -> MechInteractResult<Dialect> {
        if let Some(dialect) = self.cached() {
            debug!(dialect = %dialect, "Using cached dialect");
            return Ok(dialect);
        }

        if !self.config.use_mech_marketplace {
            info!("Marketplace disabled, using the legacy mech");
            self.remember(Dialect::LegacyDirect);
            return Ok(Dialect::LegacyDirect);
        }

        let dialect = self
            .retry
            .retry("dialect detection", || self.detect_once())
            .await
            .map_err(|e| match e {
                MechInteractError::DetectionFailure { .. } => e,
                other => MechInteractError::detection(other.to_string()),
            })?;

        info!(dialect = %dialect, "Detected mech dialect");
        self.remember(dialect);
        Ok(dialect)
    }

    fn candidates(&self) -> Vec<Box<dyn DialectHandler>> {
        Dialect::PROBE_ORDER
            .iter()
            .map(|dialect| handler_for(*dialect, self.contracts.clone(), self.config.clone()))
            .collect()
    }

    async fn detect_once(&self) -> MechInteractResult<Dialect> {
        let handlers = self.candidates();
        let outcomes = join_all(handlers.iter().map(|handler| handler.detect())).await;

        let mut answered = false;
        let mut errors = Vec::new();
        for (handler, outcome) in handlers.iter().zip(outcomes) {
            match outcome {
                Ok(true) => return Ok(handler.dialect()),
                Ok(false) => {
                    debug!(dialect = %handler.dialect(), "Dialect not supported");
                    answered = true;
                }
                Err(err) => {
                    warn!(dialect = %handler.dialect(), error = %err, "Dialect check inconclusive");
                    errors.push(format!("{}: {err}", handler.dialect()));
                }
            }
        }

        if answered {
            Ok(Dialect::LegacyDirect)
        } else {
            Err(MechInteractError::detection(errors.join("; ")))
        }
    }
}
