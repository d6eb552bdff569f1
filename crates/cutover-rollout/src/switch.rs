//! TrafficSwitch: repoints the stable Service selector from one color to
//! the other.
//!
//! The active color is read from the orchestrator on every call and
//! changed with one conditional patch, so at no observation point are zero
//! or two colors routed. A patch whose response is lost is resolved by
//! re-reading the selector rather than by assuming either outcome.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use cutover_core::{Color, ServiceRef, SwitchRecord, epoch_millis};
use cutover_orchestrator::{Orchestrator, OrchestratorError};
use cutover_state::AuditStore;

use crate::error::{RolloutError, RolloutResult};
use crate::retry::Backoff;

/// Result of a switch request that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The selector was changed; the audit record was appended.
    Switched(SwitchRecord),
    /// The selector already pointed at the target. Nothing was written.
    Unchanged { active: Color },
}

/// Attempt state carried across retries of one switch request.
#[derive(Default)]
struct Attempt {
    /// An earlier attempt's patch may have landed without us seeing it.
    unconfirmed_patch: bool,
}

#[derive(Clone)]
pub struct TrafficSwitch {
    orchestrator: Arc<dyn Orchestrator>,
    store: AuditStore,
    selector_key: String,
}

impl TrafficSwitch {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, store: AuditStore, selector_key: &str) -> Self {
        Self {
            orchestrator,
            store,
            selector_key: selector_key.to_string(),
        }
    }

    pub fn selector_key(&self) -> &str {
        &self.selector_key
    }

    /// Read the live active color.
    pub async fn active_color(&self, service: &ServiceRef) -> RolloutResult<Option<Color>> {
        self.orchestrator
            .active_color(service, &self.selector_key)
            .await
            .map_err(|e| RolloutError::from_orchestrator("read selector", e))
    }

    /// One switch attempt. Fails with `Conflict` if `from` is not active,
    /// and with `TransientNetwork` if the outcome could not be established.
    pub async fn switch(
        &self,
        service: &ServiceRef,
        from: Color,
        to: Color,
        initiated_by: &str,
    ) -> RolloutResult<SwitchOutcome> {
        self.attempt(service, from, to, initiated_by, &mut Attempt::default())
            .await
    }

    /// [`switch`](Self::switch), retried with backoff while the failure is
    /// transient.
    pub async fn switch_with_retry(
        &self,
        service: &ServiceRef,
        from: Color,
        to: Color,
        initiated_by: &str,
        backoff: &Backoff,
    ) -> RolloutResult<SwitchOutcome> {
        let mut state = Attempt::default();
        let state = &mut state;
        let mut last = None;
        for attempt in 1..=backoff.max_attempts {
            match self.attempt(service, from, to, initiated_by, state).await {
                Err(e @ RolloutError::TransientNetwork { .. }) => {
                    if attempt < backoff.max_attempts {
                        let delay = backoff.delay(attempt);
                        warn!(service = %service, %from, %to, attempt, ?delay, error = %e, "switch attempt failed; retrying");
                        tokio::time::sleep(delay).await;
                    }
                    last = Some(e);
                }
                other => return other,
            }
        }
        Err(match last {
            Some(RolloutError::TransientNetwork {
                operation, message, ..
            }) => RolloutError::TransientNetwork {
                operation,
                attempts: backoff.max_attempts,
                message,
            },
            Some(other) => other,
            None => RolloutError::TransientNetwork {
                operation: "switch".to_string(),
                attempts: 0,
                message: "no attempts made".to_string(),
            },
        })
    }

    async fn attempt(
        &self,
        service: &ServiceRef,
        from: Color,
        to: Color,
        initiated_by: &str,
        state: &mut Attempt,
    ) -> RolloutResult<SwitchOutcome> {
        let current = self.active_color(service).await?;

        if current == Some(to) {
            if state.unconfirmed_patch {
                // Our earlier patch landed; its response was lost.
                info!(service = %service, %from, %to, "earlier switch attempt confirmed applied");
                return Ok(SwitchOutcome::Switched(self.record(service, from, to, initiated_by)));
            }
            debug!(service = %service, active = %to, "selector already at target; switch is a no-op");
            return Ok(SwitchOutcome::Unchanged { active: to });
        }
        if current != Some(from) {
            return Err(RolloutError::Conflict {
                service: service.key(),
                expected: from,
                actual: current,
            });
        }

        match self
            .orchestrator
            .patch_selector(service, &self.selector_key, from, to)
            .await
        {
            Ok(()) => {
                info!(service = %service, %from, %to, %initiated_by, "traffic switched");
                Ok(SwitchOutcome::Switched(self.record(service, from, to, initiated_by)))
            }
            Err(OrchestratorError::PreconditionFailed(reason)) => {
                // Someone moved the selector between our read and our patch.
                let actual = self.active_color(service).await.ok().flatten();
                warn!(service = %service, %from, %to, %reason, ?actual, "switch lost a race");
                if actual == Some(to) {
                    return Ok(SwitchOutcome::Unchanged { active: to });
                }
                Err(RolloutError::Conflict {
                    service: service.key(),
                    expected: from,
                    actual,
                })
            }
            Err(e) if e.is_transient() => {
                state.unconfirmed_patch = true;
                match self.active_color(service).await {
                    Ok(Some(now)) if now == to => {
                        info!(service = %service, %from, %to, error = %e, "switch applied despite failed response");
                        Ok(SwitchOutcome::Switched(self.record(service, from, to, initiated_by)))
                    }
                    Ok(Some(now)) if now == from => {
                        state.unconfirmed_patch = false;
                        Err(RolloutError::from_orchestrator("patch selector", e))
                    }
                    Ok(other) => Err(RolloutError::Conflict {
                        service: service.key(),
                        expected: from,
                        actual: other,
                    }),
                    Err(_) => Err(RolloutError::from_orchestrator("patch selector", e)),
                }
            }
            Err(e) => Err(RolloutError::from_orchestrator("patch selector", e)),
        }
    }

    /// Append the audit entry for an applied switch. The selector is the
    /// source of truth, so a store failure is logged rather than returned.
    fn record(&self, service: &ServiceRef, from: Color, to: Color, initiated_by: &str) -> SwitchRecord {
        let record = SwitchRecord {
            service: service.key(),
            from,
            to,
            timestamp_ms: epoch_millis(),
            initiated_by: initiated_by.to_string(),
        };
        if let Err(e) = self.store.append_switch(&record) {
            error!(service = %service, %from, %to, error = %e, "failed to persist switch record");
        }
        record
    }
}
