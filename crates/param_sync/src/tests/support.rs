use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use shared::{
    domain::{GrabHandle, ParamId},
    error::{BridgeError, BridgeOperation},
    protocol::{BridgeEvent, ParameterInfo},
};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};

use crate::{
    bridge::Bridge,
    registry::ParameterRegistry,
    store::ParameterStore,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BridgeCall {
    RequestAll,
    Set { id: ParamId, value: f64 },
    Grab { id: ParamId },
    Move { handle: GrabHandle, value: f64 },
    Ungrab { handle: GrabHandle },
}

type HeldMove = oneshot::Sender<Result<(), BridgeError>>;

/// Bridge double that records every call and can hold move acknowledgements
/// open until the test releases them.
pub(crate) struct ScriptedBridge {
    info: HashMap<ParamId, ParameterInfo>,
    events: broadcast::Sender<BridgeEvent>,
    calls: StdMutex<Vec<BridgeCall>>,
    call_tx: mpsc::UnboundedSender<BridgeCall>,
    call_rx: Mutex<mpsc::UnboundedReceiver<BridgeCall>>,
    next_handle: AtomicU64,
    hold_moves: AtomicBool,
    held_moves: StdMutex<VecDeque<HeldMove>>,
    fail_grabs: AtomicBool,
    fail_moves: AtomicBool,
}

impl ScriptedBridge {
    pub(crate) fn new(info: HashMap<ParamId, ParameterInfo>) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        let (call_tx, call_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            info,
            events,
            calls: StdMutex::new(Vec::new()),
            call_tx,
            call_rx: Mutex::new(call_rx),
            next_handle: AtomicU64::new(1),
            hold_moves: AtomicBool::new(false),
            held_moves: StdMutex::new(VecDeque::new()),
            fail_grabs: AtomicBool::new(false),
            fail_moves: AtomicBool::new(false),
        })
    }

    pub(crate) fn hold_moves(&self) {
        self.hold_moves.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_grabs(&self) {
        self.fail_grabs.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_moves(&self) {
        self.fail_moves.store(true, Ordering::SeqCst);
    }

    /// Resolves the oldest held move.
    pub(crate) fn release_next_move(&self) {
        let held = self
            .held_moves
            .lock()
            .expect("held moves")
            .pop_front()
            .expect("a held move");
        let _ = held.send(Ok(()));
    }

    pub(crate) fn calls(&self) -> Vec<BridgeCall> {
        self.calls.lock().expect("calls").clone()
    }

    pub(crate) async fn next_call(&self) -> BridgeCall {
        tokio::time::timeout(Duration::from_secs(2), self.call_rx.lock().await.recv())
            .await
            .expect("bridge call within timeout")
            .expect("call channel open")
    }

    pub(crate) async fn assert_quiet(&self) {
        let next = tokio::time::timeout(
            Duration::from_millis(50),
            async { self.call_rx.lock().await.recv().await },
        )
        .await;
        assert!(next.is_err(), "unexpected bridge call: {next:?}");
    }

    pub(crate) fn emit(&self, id: &str, value: f64) {
        let _ = self.events.send(BridgeEvent::ParamChanged {
            id: ParamId::new(id),
            value,
        });
    }

    fn record(&self, call: BridgeCall) {
        self.calls.lock().expect("calls").push(call.clone());
        let _ = self.call_tx.send(call);
    }
}

#[async_trait]
impl Bridge for ScriptedBridge {
    fn parameter_info(&self) -> HashMap<ParamId, ParameterInfo> {
        self.info.clone()
    }

    fn subscribe_events(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    fn request_all_parameters(&self) {
        self.record(BridgeCall::RequestAll);
    }

    fn set_parameter(&self, id: &ParamId, value: f64) {
        self.record(BridgeCall::Set {
            id: id.clone(),
            value,
        });
    }

    async fn grab(&self, id: &ParamId) -> Result<GrabHandle, BridgeError> {
        self.record(BridgeCall::Grab { id: id.clone() });
        if self.fail_grabs.load(Ordering::SeqCst) {
            return Err(BridgeError::rejected(BridgeOperation::Grab, "scripted failure"));
        }
        Ok(GrabHandle(self.next_handle.fetch_add(1, Ordering::SeqCst)))
    }

    async fn move_grabbed(&self, handle: GrabHandle, value: f64) -> Result<(), BridgeError> {
        self.record(BridgeCall::Move { handle, value });
        if self.fail_moves.load(Ordering::SeqCst) {
            return Err(BridgeError::rejected(BridgeOperation::Move, "scripted failure"));
        }
        if !self.hold_moves.load(Ordering::SeqCst) {
            return Ok(());
        }
        let (tx, rx) = oneshot::channel();
        self.held_moves.lock().expect("held moves").push_back(tx);
        rx.await.unwrap_or(Err(BridgeError::Unavailable))
    }

    async fn ungrab(&self, handle: GrabHandle) -> Result<(), BridgeError> {
        self.record(BridgeCall::Ungrab { handle });
        Ok(())
    }
}

pub(crate) fn unit_params(ids: &[&str]) -> HashMap<ParamId, ParameterInfo> {
    ids.iter()
        .map(|id| (ParamId::new(*id), ParameterInfo::new(0.0, 1.0)))
        .collect()
}

pub(crate) fn store_for(bridge: &Arc<ScriptedBridge>) -> Arc<ParameterStore> {
    let registry = ParameterRegistry::from_bridge(bridge.as_ref()).expect("registry");
    Arc::new(ParameterStore::new(
        Arc::new(registry),
        Arc::clone(bridge) as Arc<dyn Bridge>,
        64,
    ))
}

pub(crate) async fn primed_store(
    bridge: &Arc<ScriptedBridge>,
    values: &[(&str, f64)],
) -> Arc<ParameterStore> {
    let store = store_for(bridge);
    for (id, value) in values {
        store.ingest(ParamId::new(*id), *value).await;
    }
    assert!(store.is_ready(), "store should be primed");
    store
}
