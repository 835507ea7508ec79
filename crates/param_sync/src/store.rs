use std::{
    collections::{BTreeMap, HashMap},
    mem,
    sync::Arc,
};

use shared::{domain::ParamId, protocol::BridgeEvent};
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    bridge::Bridge,
    registry::{ParameterRegistry, RegistryError},
};

pub type ReadyCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Changed { id: ParamId, value: f64 },
}

/// Authoritative value per parameter plus the one-way ready gate.
///
/// Nothing outside this type writes the value map. Notifications are only
/// published once every registered parameter has received a value.
pub struct ParameterStore {
    registry: Arc<ParameterRegistry>,
    bridge: Arc<dyn Bridge>,
    inner: Mutex<StoreState>,
    ready: watch::Sender<bool>,
    events: broadcast::Sender<StoreEvent>,
}

struct StoreState {
    values: HashMap<ParamId, f64>,
    ready: bool,
    pending_ready: Vec<ReadyCallback>,
}

enum Write {
    Unconditional,
    IfChanged,
}

impl ParameterStore {
    pub fn new(
        registry: Arc<ParameterRegistry>,
        bridge: Arc<dyn Bridge>,
        event_capacity: usize,
    ) -> Self {
        // An empty registry is primed from the start.
        let primed = registry.is_empty();
        let (events, _) = broadcast::channel(event_capacity.max(1));
        let (ready, _) = watch::channel(primed);
        Self {
            registry,
            bridge,
            inner: Mutex::new(StoreState {
                values: HashMap::new(),
                ready: primed,
                pending_ready: Vec::new(),
            }),
            ready,
            events,
        }
    }

    /// Builds the registry from the bridge, starts ingesting its event stream
    /// and asks the host for the initial burst of values.
    pub fn connect(
        bridge: Arc<dyn Bridge>,
        event_capacity: usize,
    ) -> Result<(Arc<Self>, JoinHandle<()>), RegistryError> {
        let registry = Arc::new(ParameterRegistry::from_bridge(bridge.as_ref())?);
        let store = Arc::new(Self::new(registry, Arc::clone(&bridge), event_capacity));
        // Subscribe before requesting so the burst cannot be missed.
        let pump = spawn_event_pump(Arc::clone(&store), bridge.subscribe_events());
        bridge.request_all_parameters();
        info!(
            parameters = store.registry.len(),
            "requested initial parameter values"
        );
        Ok((store, pump))
    }

    pub fn registry(&self) -> &ParameterRegistry {
        &self.registry
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub async fn wait_until_ready(&self) {
        let mut ready = self.ready.subscribe();
        let _ = ready.wait_for(|ready| *ready).await;
    }

    /// Unconditional write from the host's notification stream.
    pub async fn ingest(&self, id: ParamId, value: f64) {
        self.commit(id, value, Write::Unconditional).await;
    }

    /// Write of a host-confirmed grabbed move. Skipped when the value is
    /// already current. Returns whether the store changed.
    pub async fn apply_confirmed(&self, id: ParamId, value: f64) -> bool {
        self.commit(id, value, Write::IfChanged).await
    }

    /// UI-initiated write, forwarded to the host when applied.
    ///
    /// Silently ignored before the store is ready or when `value` equals the
    /// current value exactly.
    pub async fn set_local(&self, id: ParamId, value: f64) -> bool {
        {
            let mut state = self.inner.lock().await;
            if !state.ready {
                debug!(id = %id, value, "ignoring local write before parameters are primed");
                return false;
            }
            if state.values.get(&id) == Some(&value) {
                return false;
            }
            state.values.insert(id.clone(), value);
        }
        self.bridge.set_parameter(&id, value);
        self.publish(id, value);
        true
    }

    /// Runs `callback` once the store is ready. When it already is, the
    /// callback is deferred to a fresh task rather than run inline.
    pub async fn on_ready<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.lock().await;
        if state.ready {
            drop(state);
            tokio::spawn(async move { callback() });
        } else {
            state.pending_ready.push(Box::new(callback));
        }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            events: self.events.subscribe(),
        }
    }

    pub async fn value(&self, id: &ParamId) -> Option<f64> {
        self.inner.lock().await.values.get(id).copied()
    }

    pub async fn snapshot(&self) -> BTreeMap<ParamId, f64> {
        let state = self.inner.lock().await;
        state
            .values
            .iter()
            .map(|(id, value)| (id.clone(), *value))
            .collect()
    }

    async fn commit(&self, id: ParamId, value: f64, write: Write) -> bool {
        let (notify, opened) = {
            let mut state = self.inner.lock().await;
            if matches!(write, Write::IfChanged) && state.values.get(&id) == Some(&value) {
                return false;
            }
            if !self.registry.contains(&id) {
                debug!(id = %id, "storing value for unregistered parameter");
            }
            state.values.insert(id.clone(), value);

            let was_ready = state.ready;
            if !was_ready {
                let primed = self
                    .registry
                    .ids()
                    .all(|known| state.values.contains_key(known));
                state.ready = primed;
            }
            let opened = if state.ready && !was_ready {
                Some(mem::take(&mut state.pending_ready))
            } else {
                None
            };
            (state.ready, opened)
        };

        if let Some(callbacks) = opened {
            info!(
                parameters = self.registry.len(),
                callbacks = callbacks.len(),
                "all parameters primed; store is ready"
            );
            self.ready.send_replace(true);
            for callback in callbacks {
                callback();
            }
        }
        if notify {
            self.publish(id, value);
        }
        true
    }

    fn publish(&self, id: ParamId, value: f64) {
        // No subscribers is not an error.
        let _ = self.events.send(StoreEvent::Changed { id, value });
    }
}

/// Handle on the store's change notifications. Dropping it unsubscribes.
pub struct Subscription {
    events: broadcast::Receiver<StoreEvent>,
}

impl Subscription {
    /// Next change, or `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<StoreEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "store subscriber lagged; dropped change notifications");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<StoreEvent> {
        loop {
            match self.events.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "store subscriber lagged; dropped change notifications");
                }
                Err(_) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}

/// Feeds every host notification into [`ParameterStore::ingest`] until the
/// event stream closes.
pub fn spawn_event_pump(
    store: Arc<ParameterStore>,
    mut events: broadcast::Receiver<BridgeEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(BridgeEvent::ParamChanged { id, value }) => store.ingest(id, value).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "host event stream lagged; parameter updates were lost");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("host event stream closed");
    })
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
