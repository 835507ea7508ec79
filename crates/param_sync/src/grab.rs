use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use shared::{
    domain::{GrabHandle, ParamId},
    error::BridgeError,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::{bridge::Bridge, store::ParameterStore};

/// What to do when a second grab is requested for a parameter that already
/// has a live or pending one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrabPolicy {
    /// Forward every request and let the host arbitrate.
    #[default]
    Allow,
    /// Refuse locally with [`GrabError::AlreadyGrabbed`].
    Reject,
}

impl GrabPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "allow" => Some(Self::Allow),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GrabError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error("unknown parameter {0}")]
    UnknownParameter(ParamId),
    #[error("parameter {0} is already grabbed")]
    AlreadyGrabbed(ParamId),
    #[error("{0} is not a live grab")]
    NotLive(GrabHandle),
    #[error("host issued {0} more than once")]
    HandleReused(GrabHandle),
}

enum LaneJob {
    Move {
        value: f64,
        ack: oneshot::Sender<Result<(), GrabError>>,
    },
    Release {
        ack: oneshot::Sender<Result<(), GrabError>>,
    },
}

struct LiveGrab {
    id: ParamId,
    lane: mpsc::UnboundedSender<LaneJob>,
}

#[derive(Default)]
struct GrabTable {
    live: HashMap<GrabHandle, LiveGrab>,
    pending: HashMap<ParamId, usize>,
    /// Every handle ever revoked. Never pruned: the host is not trusted to
    /// keep handles unique, so a reissued one must still be caught however
    /// old it is.
    retired: HashSet<GrabHandle>,
}

impl GrabTable {
    fn is_claimed(&self, id: &ParamId) -> bool {
        self.pending.get(id).is_some_and(|count| *count > 0)
            || self.live.values().any(|grab| &grab.id == id)
    }

    fn settle_pending(&mut self, id: &ParamId) {
        if let Some(count) = self.pending.get_mut(id) {
            *count -= 1;
            if *count == 0 {
                self.pending.remove(id);
            }
        }
    }
}

/// Issues and revokes grabs and owns one FIFO request lane per live handle.
///
/// Each lane has at most one host request in flight: a move is not sent
/// until the previous request on the same handle was acknowledged. Lanes of
/// different handles never wait on each other.
pub struct GrabManager {
    store: Arc<ParameterStore>,
    bridge: Arc<dyn Bridge>,
    policy: GrabPolicy,
    table: Mutex<GrabTable>,
}

impl GrabManager {
    pub fn new(
        store: Arc<ParameterStore>,
        bridge: Arc<dyn Bridge>,
        policy: GrabPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            bridge,
            policy,
            table: Mutex::new(GrabTable::default()),
        })
    }

    pub fn policy(&self) -> GrabPolicy {
        self.policy
    }

    pub async fn acquire(self: &Arc<Self>, id: &ParamId) -> Result<Grab, GrabError> {
        if !self.store.registry().contains(id) {
            return Err(GrabError::UnknownParameter(id.clone()));
        }
        {
            let mut table = self.table.lock().await;
            if self.policy == GrabPolicy::Reject && table.is_claimed(id) {
                return Err(GrabError::AlreadyGrabbed(id.clone()));
            }
            *table.pending.entry(id.clone()).or_default() += 1;
        }

        let requested = self.bridge.grab(id).await;

        let mut table = self.table.lock().await;
        table.settle_pending(id);
        let handle = match requested {
            Ok(handle) => handle,
            Err(err) => {
                warn!(id = %id, error = %err, "host refused grab");
                return Err(err.into());
            }
        };
        if table.live.contains_key(&handle) || table.retired.contains(&handle) {
            warn!(id = %id, handle = handle.0, "host reissued a grab handle");
            return Err(GrabError::HandleReused(handle));
        }

        let (lane, jobs) = mpsc::unbounded_channel();
        table.live.insert(
            handle,
            LiveGrab {
                id: id.clone(),
                lane: lane.clone(),
            },
        );
        drop(table);

        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.run_lane(handle, jobs).await });
        info!(id = %id, handle = handle.0, "grab acquired");

        Ok(Grab {
            handle,
            id: id.clone(),
            lane,
        })
    }

    /// Queues a move on `handle` and waits for the host to acknowledge it.
    pub async fn move_grabbed(&self, handle: GrabHandle, value: f64) -> Result<(), GrabError> {
        let ack = {
            let table = self.table.lock().await;
            let grab = table.live.get(&handle).ok_or(GrabError::NotLive(handle))?;
            enqueue_move(&grab.lane, handle, value)
        };
        ack.wait().await
    }

    /// Retires `handle` immediately, then sends the release to the host
    /// behind any moves already queued on it.
    ///
    /// Acknowledgements that arrive after this call starts are stale and never
    /// reach the store.
    pub async fn revoke(&self, handle: GrabHandle) -> Result<(), GrabError> {
        let grab = {
            let mut table = self.table.lock().await;
            let grab = table
                .live
                .remove(&handle)
                .ok_or(GrabError::NotLive(handle))?;
            table.retired.insert(handle);
            grab
        };
        info!(id = %grab.id, handle = handle.0, "grab revoked");

        let (ack, released) = oneshot::channel();
        if grab.lane.send(LaneJob::Release { ack }).is_err() {
            return self.bridge.ungrab(handle).await.map_err(GrabError::from);
        }
        released.await.unwrap_or(Err(GrabError::NotLive(handle)))
    }

    pub async fn lookup(&self, handle: GrabHandle) -> Option<ParamId> {
        self.table
            .lock()
            .await
            .live
            .get(&handle)
            .map(|grab| grab.id.clone())
    }

    pub async fn live_grabs(&self) -> Vec<(GrabHandle, ParamId)> {
        let table = self.table.lock().await;
        let mut grabs = table
            .live
            .iter()
            .map(|(handle, grab)| (*handle, grab.id.clone()))
            .collect::<Vec<_>>();
        grabs.sort_by_key(|(handle, _)| handle.0);
        grabs
    }

    async fn run_lane(&self, handle: GrabHandle, mut jobs: mpsc::UnboundedReceiver<LaneJob>) {
        while let Some(job) = jobs.recv().await {
            match job {
                LaneJob::Move { value, ack } => {
                    let result = self.bridge.move_grabbed(handle, value).await;
                    match &result {
                        Ok(()) => self.confirm(handle, value).await,
                        Err(err) => {
                            warn!(handle = handle.0, value, error = %err, "host rejected grabbed move");
                        }
                    }
                    let _ = ack.send(result.map_err(GrabError::from));
                }
                LaneJob::Release { ack } => {
                    let result = self.bridge.ungrab(handle).await;
                    if let Err(err) = &result {
                        warn!(handle = handle.0, error = %err, "host rejected ungrab");
                    }
                    let _ = ack.send(result.map_err(GrabError::from));
                    break;
                }
            }
        }
        debug!(handle = handle.0, "grab lane closed");
    }

    /// The table stays locked across the store write so a concurrent
    /// `revoke` either lands before the liveness check or after the write.
    async fn confirm(&self, handle: GrabHandle, value: f64) {
        let table = self.table.lock().await;
        match table.live.get(&handle) {
            Some(grab) => {
                self.store.apply_confirmed(grab.id.clone(), value).await;
            }
            None => debug!(handle = handle.0, value, "discarding stale move acknowledgement"),
        }
    }
}

/// A live grab as seen by its owner. Moves submitted through it reach the
/// host in submission order.
#[derive(Clone)]
pub struct Grab {
    handle: GrabHandle,
    id: ParamId,
    lane: mpsc::UnboundedSender<LaneJob>,
}

impl Grab {
    pub fn handle(&self) -> GrabHandle {
        self.handle
    }

    pub fn id(&self) -> &ParamId {
        &self.id
    }

    /// Queues a move without waiting. The position in the lane is fixed when
    /// this returns.
    pub fn submit(&self, value: f64) -> MoveAck {
        enqueue_move(&self.lane, self.handle, value)
    }
}

/// Pending acknowledgement of one queued move.
pub struct MoveAck {
    handle: GrabHandle,
    ack: oneshot::Receiver<Result<(), GrabError>>,
}

impl MoveAck {
    pub async fn wait(self) -> Result<(), GrabError> {
        // A dropped sender means the lane shut down before sending this move.
        self.ack
            .await
            .unwrap_or(Err(GrabError::NotLive(self.handle)))
    }
}

fn enqueue_move(lane: &mpsc::UnboundedSender<LaneJob>, handle: GrabHandle, value: f64) -> MoveAck {
    let (ack, rx) = oneshot::channel();
    if lane.send(LaneJob::Move { value, ack }).is_err() {
        debug!(handle = handle.0, value, "move submitted after lane shut down");
    }
    MoveAck { handle, ack: rx }
}

#[cfg(test)]
#[path = "tests/grab_tests.rs"]
mod tests;
