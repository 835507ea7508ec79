use std::collections::HashMap;

use async_trait::async_trait;
use shared::{
    domain::{GrabHandle, ParamId},
    error::{BridgeError, BridgeOperation},
    protocol::{BridgeEvent, ParameterInfo},
};
use tokio::sync::broadcast;

/// Asynchronous transport to the control host.
///
/// `set_parameter` and `request_all_parameters` are fire-and-forget; the host
/// answers them, if at all, through the event stream. The grab triple is
/// request/response.
#[async_trait]
pub trait Bridge: Send + Sync {
    fn parameter_info(&self) -> HashMap<ParamId, ParameterInfo>;
    fn subscribe_events(&self) -> broadcast::Receiver<BridgeEvent>;
    fn request_all_parameters(&self);
    fn set_parameter(&self, id: &ParamId, value: f64);
    async fn grab(&self, id: &ParamId) -> Result<GrabHandle, BridgeError>;
    async fn move_grabbed(&self, handle: GrabHandle, value: f64) -> Result<(), BridgeError>;
    async fn ungrab(&self, handle: GrabHandle) -> Result<(), BridgeError>;
}

/// Bridge for read-only configurations: publishes a parameter set but never
/// sends values and refuses every grab.
pub struct InertBridge {
    info: HashMap<ParamId, ParameterInfo>,
    events: broadcast::Sender<BridgeEvent>,
}

impl InertBridge {
    pub fn new(info: HashMap<ParamId, ParameterInfo>) -> Self {
        let (events, _) = broadcast::channel(1);
        Self { info, events }
    }
}

#[async_trait]
impl Bridge for InertBridge {
    fn parameter_info(&self) -> HashMap<ParamId, ParameterInfo> {
        self.info.clone()
    }

    fn subscribe_events(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    fn request_all_parameters(&self) {}

    fn set_parameter(&self, _id: &ParamId, _value: f64) {}

    async fn grab(&self, id: &ParamId) -> Result<GrabHandle, BridgeError> {
        Err(BridgeError::rejected(
            BridgeOperation::Grab,
            format!("parameter {id} is read-only"),
        ))
    }

    async fn move_grabbed(&self, handle: GrabHandle, _value: f64) -> Result<(), BridgeError> {
        Err(BridgeError::UnknownGrab(handle))
    }

    async fn ungrab(&self, handle: GrabHandle) -> Result<(), BridgeError> {
        Err(BridgeError::UnknownGrab(handle))
    }
}
