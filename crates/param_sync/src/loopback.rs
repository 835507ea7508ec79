//! In-process stand-in for the control host.
//!
//! Keeps authoritative values, echoes every accepted write on the event
//! stream and reference-counts grabs per parameter: the first grab marks a
//! parameter as being edited and the last ungrab clears it.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use shared::{
    domain::{GrabHandle, ParamId},
    error::{BridgeError, BridgeOperation},
    protocol::{BridgeEvent, ParameterInfo},
};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::bridge::Bridge;

pub struct LoopbackHost {
    info: HashMap<ParamId, ParameterInfo>,
    latency: Duration,
    state: Mutex<HostState>,
    events: broadcast::Sender<BridgeEvent>,
}

#[derive(Default)]
struct HostState {
    values: HashMap<ParamId, f64>,
    grabs: HashMap<GrabHandle, ParamId>,
    grab_counts: HashMap<ParamId, u64>,
    next_handle: u64,
}

impl LoopbackHost {
    pub fn new(info: HashMap<ParamId, ParameterInfo>) -> Self {
        let values = info
            .iter()
            .map(|(id, info)| (id.clone(), info.default_value.unwrap_or(info.min)))
            .collect();
        let (events, _) = broadcast::channel(1024);
        Self {
            info,
            latency: Duration::ZERO,
            state: Mutex::new(HostState {
                values,
                next_handle: 1,
                ..HostState::default()
            }),
            events,
        }
    }

    /// Delays every grab, move and ungrab response.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn value(&self, id: &ParamId) -> Option<f64> {
        self.state().values.get(id).copied()
    }

    pub fn is_grabbed(&self, id: &ParamId) -> bool {
        self.grab_count(id) > 0
    }

    pub fn grab_count(&self, id: &ParamId) -> u64 {
        self.state().grab_counts.get(id).copied().unwrap_or(0)
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn clamp(&self, id: &ParamId, value: f64) -> f64 {
        match self.info.get(id) {
            Some(info) => info.range().clamp(value),
            None => value,
        }
    }

    fn write(&self, id: ParamId, value: f64) {
        let value = self.clamp(&id, value);
        self.state().values.insert(id.clone(), value);
        let _ = self.events.send(BridgeEvent::ParamChanged { id, value });
    }

    async fn respond(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl Bridge for LoopbackHost {
    fn parameter_info(&self) -> HashMap<ParamId, ParameterInfo> {
        self.info.clone()
    }

    fn subscribe_events(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    fn request_all_parameters(&self) {
        let mut values = self
            .state()
            .values
            .iter()
            .map(|(id, value)| (id.clone(), *value))
            .collect::<Vec<_>>();
        values.sort_by(|a, b| a.0.cmp(&b.0));
        for (id, value) in values {
            let _ = self.events.send(BridgeEvent::ParamChanged { id, value });
        }
    }

    fn set_parameter(&self, id: &ParamId, value: f64) {
        if !self.info.contains_key(id) {
            debug!(id = %id, "host ignoring write to unknown parameter");
            return;
        }
        self.write(id.clone(), value);
    }

    async fn grab(&self, id: &ParamId) -> Result<GrabHandle, BridgeError> {
        self.respond().await;
        if !self.info.contains_key(id) {
            return Err(BridgeError::rejected(
                BridgeOperation::Grab,
                format!("unknown parameter {id}"),
            ));
        }
        let mut state = self.state();
        let handle = GrabHandle(state.next_handle);
        state.next_handle += 1;
        state.grabs.insert(handle, id.clone());
        let count = state.grab_counts.entry(id.clone()).or_default();
        *count += 1;
        if *count == 1 {
            info!(id = %id, "host: parameter edit began");
        }
        Ok(handle)
    }

    async fn move_grabbed(&self, handle: GrabHandle, value: f64) -> Result<(), BridgeError> {
        self.respond().await;
        let id = self
            .state()
            .grabs
            .get(&handle)
            .cloned()
            .ok_or(BridgeError::UnknownGrab(handle))?;
        self.write(id, value);
        Ok(())
    }

    async fn ungrab(&self, handle: GrabHandle) -> Result<(), BridgeError> {
        self.respond().await;
        let mut state = self.state();
        let id = state
            .grabs
            .remove(&handle)
            .ok_or(BridgeError::UnknownGrab(handle))?;
        let count = state.grab_counts.entry(id.clone()).or_default();
        let was_grabbed = *count != 0;
        *count = count.saturating_sub(1);
        if was_grabbed && *count == 0 {
            info!(id = %id, "host: parameter edit ended");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/loopback_tests.rs"]
mod tests;
