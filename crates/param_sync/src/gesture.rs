//! Drag-to-value gesture handling.
//!
//! A [`GestureController`] is either idle or tracking one drag. While
//! active it turns cumulative pointer displacement into clamped values,
//! keeps an optimistic preview for the rendering layer, and hands every
//! changed value to the [`GestureClient`] returned by its hook.

use std::sync::Arc;

use shared::domain::{ParamId, ParamRange};
use thiserror::Error;
use tokio::{runtime::Handle, sync::mpsc};
use tracing::{debug, warn};

use crate::{config::Settings, grab::GrabManager};

/// Session-scoped interface handed out when a gesture starts.
pub trait GestureClient: Send {
    fn push(&mut self, value: f64);
    fn finish(self: Box<Self>);
}

/// Starts the host-side half of a gesture. Must not block: grab
/// acquisition happens behind the returned client.
pub trait GestureHook: Send + Sync {
    fn start_gesture(&self) -> Box<dyn GestureClient>;
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GestureError {
    #[error("a gesture is already active")]
    AlreadyActive,
    #[error("no gesture is active")]
    NotActive,
    #[error("throw distance must be positive and finite, got {0}")]
    InvalidThrow(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnobConfig {
    pub range: ParamRange,
    /// Pixels of travel that sweep the whole range.
    pub throw_distance: f64,
    /// Show the in-gesture value instead of the authoritative one.
    pub optimistic: bool,
}

impl Default for KnobConfig {
    fn default() -> Self {
        Self {
            range: ParamRange::new(0.0, 1.0),
            throw_distance: 200.0,
            optimistic: false,
        }
    }
}

impl KnobConfig {
    pub fn from_settings(range: ParamRange, settings: &Settings) -> Self {
        Self {
            range,
            throw_distance: settings.throw_distance,
            optimistic: settings.optimistic,
        }
    }

    fn value_per_pixel(&self) -> f64 {
        self.range.span() / self.throw_distance
    }
}

struct GestureSession {
    initial_value: f64,
    working_value: f64,
    cumulative_delta: f64,
    preview: Option<f64>,
    client: Option<Box<dyn GestureClient>>,
}

enum GestureState {
    Idle,
    Active(GestureSession),
}

pub struct GestureController {
    param_id: ParamId,
    config: KnobConfig,
    hook: Option<Arc<dyn GestureHook>>,
    state: GestureState,
}

impl GestureController {
    /// Without a hook the controller still previews locally but never talks
    /// to the host.
    pub fn new(
        param_id: ParamId,
        config: KnobConfig,
        hook: Option<Arc<dyn GestureHook>>,
    ) -> Result<Self, GestureError> {
        if !config.throw_distance.is_finite() || config.throw_distance <= 0.0 {
            return Err(GestureError::InvalidThrow(config.throw_distance));
        }
        Ok(Self {
            param_id,
            config,
            hook,
            state: GestureState::Idle,
        })
    }

    pub fn param_id(&self) -> &ParamId {
        &self.param_id
    }

    pub fn config(&self) -> &KnobConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, GestureState::Active(_))
    }

    pub fn begin(&mut self, displayed_value: f64) -> Result<(), GestureError> {
        if self.is_active() {
            warn!(id = %self.param_id, "gesture started while another is active");
            return Err(GestureError::AlreadyActive);
        }
        let client = self.hook.as_ref().map(|hook| hook.start_gesture());
        debug!(id = %self.param_id, value = displayed_value, grabbing = client.is_some(), "gesture started");
        self.state = GestureState::Active(GestureSession {
            initial_value: displayed_value,
            working_value: displayed_value,
            cumulative_delta: 0.0,
            preview: None,
            client,
        });
        Ok(())
    }

    /// Feeds the drag's total vertical displacement since `begin`, in screen
    /// pixels (down is positive, so dragging up raises the value).
    ///
    /// Returns the new working value when it changed.
    pub fn update(&mut self, cumulative_dy: f64) -> Result<Option<f64>, GestureError> {
        let value_per_pixel = self.config.value_per_pixel();
        let range = self.config.range;
        let GestureState::Active(session) = &mut self.state else {
            return Err(GestureError::NotActive);
        };

        let displacement = -cumulative_dy;
        let step = displacement - session.cumulative_delta;
        session.cumulative_delta = displacement;

        let candidate = range.clamp(session.working_value + step * value_per_pixel);
        if candidate == session.working_value {
            return Ok(None);
        }
        session.working_value = candidate;
        session.preview = Some(candidate);
        if let Some(client) = session.client.as_mut() {
            client.push(candidate);
        }
        Ok(Some(candidate))
    }

    pub fn end(&mut self) -> Result<(), GestureError> {
        let GestureState::Active(session) = std::mem::replace(&mut self.state, GestureState::Idle)
        else {
            return Err(GestureError::NotActive);
        };
        debug!(
            id = %self.param_id,
            from = session.initial_value,
            to = session.working_value,
            "gesture ended"
        );
        if let Some(client) = session.client {
            client.finish();
        }
        Ok(())
    }

    /// A competing interaction took the pointer over; same as [`Self::end`].
    pub fn terminate(&mut self) -> Result<(), GestureError> {
        self.end()
    }

    pub fn working_value(&self) -> Option<f64> {
        match &self.state {
            GestureState::Active(session) => Some(session.working_value),
            GestureState::Idle => None,
        }
    }

    pub fn optimistic_value(&self) -> Option<f64> {
        match &self.state {
            GestureState::Active(session) => session.preview,
            GestureState::Idle => None,
        }
    }

    pub fn display_value(&self, authoritative: f64) -> f64 {
        if !self.config.optimistic {
            return authoritative;
        }
        self.optimistic_value().unwrap_or(authoritative)
    }

    /// Position of `value` within the range, in `[0, 1]`.
    pub fn progress(&self, value: f64) -> f64 {
        let span = self.config.range.span();
        if span <= 0.0 {
            return 0.0;
        }
        ((value - self.config.range.min) / span).clamp(0.0, 1.0)
    }
}

/// Hook that backs each gesture with a grab on one parameter.
///
/// Sessions are spawned on `runtime`, so gestures may be driven from a
/// thread that is not itself inside a tokio runtime.
pub struct GrabGestureHook {
    manager: Arc<GrabManager>,
    id: ParamId,
    runtime: Handle,
}

impl GrabGestureHook {
    pub fn new(manager: Arc<GrabManager>, id: ParamId, runtime: Handle) -> Self {
        Self {
            manager,
            id,
            runtime,
        }
    }
}

impl GestureHook for GrabGestureHook {
    fn start_gesture(&self) -> Box<dyn GestureClient> {
        let (commands, rx) = mpsc::unbounded_channel();
        self.runtime.spawn(run_grab_session(
            Arc::clone(&self.manager),
            self.id.clone(),
            rx,
        ));
        Box::new(GrabGestureClient { commands })
    }
}

enum SessionCommand {
    Push(f64),
    Finish,
}

struct GrabGestureClient {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl GestureClient for GrabGestureClient {
    fn push(&mut self, value: f64) {
        let _ = self.commands.send(SessionCommand::Push(value));
    }

    fn finish(self: Box<Self>) {
        let _ = self.commands.send(SessionCommand::Finish);
    }
}

/// Acquires the grab, forwards pushes in order once it is held, and revokes
/// it on finish once the last forwarded move has been acknowledged. Pushes
/// that arrive while the grab is pending wait in the command queue.
async fn run_grab_session(
    manager: Arc<GrabManager>,
    id: ParamId,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
) {
    let grab = match manager.acquire(&id).await {
        Ok(grab) => Some(grab),
        Err(err) => {
            warn!(id = %id, error = %err, "gesture continues without a grab");
            None
        }
    };

    let mut last_move = None;
    while let Some(command) = commands.recv().await {
        match command {
            SessionCommand::Push(value) => {
                if let Some(grab) = &grab {
                    last_move = Some(grab.submit(value));
                }
            }
            SessionCommand::Finish => break,
        }
    }

    if let Some(grab) = grab {
        // Rejections are logged by the lane and not retried.
        if let Some(ack) = last_move {
            let _ = ack.wait().await;
        }
        if let Err(err) = manager.revoke(grab.handle()).await {
            warn!(id = %id, handle = grab.handle().0, error = %err, "grab release failed");
        }
    }
}

#[cfg(test)]
#[path = "tests/gesture_tests.rs"]
mod tests;
