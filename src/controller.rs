//! Client session driving one engine step by step.
//!
//! ## Failure policy
//!
//! | Outcome                                   | `step` returns                    | `last_event` |
//! |-------------------------------------------|-----------------------------------|--------------|
//! | success                                   | `Ok(event)`                       | updated      |
//! | `ActionFailed`, lenient                   | `Ok(event)` with success = false  | updated      |
//! | `ActionFailed`, strict                    | `Err(ActionFailed)`               | updated      |
//! | dispatch failure (invalid/missing/ambiguous/argument) | `Err(Dispatch)`       | updated      |
//! | transport or decode failure               | `Err(Transport / Codec)`          | unchanged    |
//!
//! A transport or decode failure ends the session: every later `step`
//! returns [`ControllerError::SessionFailed`] until a new controller is built.

use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};

use crate::cache::ObjectListCache;
use crate::codec::{decode_response, encode_action};
use crate::error::{CodecError, ControllerError};
use crate::event::Event;
use crate::protocol::{ActionRequest, InitializeOptions};
use crate::http::HttpTransport;
use crate::transport::{PipeTransport, Transport};

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// How long one step may take before the session is declared failed.
    pub timeout: Duration,
    /// Raise `ActionFailed` instead of returning a failed event.
    pub strict: bool,
    pub initialize: InitializeOptions,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            strict: false,
            initialize: InitializeOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Failed,
    Stopped,
}

pub struct Controller {
    transport: Box<dyn Transport>,
    objects: ObjectListCache,
    last_event: Option<Event>,
    sequence: u64,
    strict: bool,
    state: SessionState,
}

impl Controller {
    /// Take over `transport` and initialise the session.
    pub fn new(transport: Box<dyn Transport>, config: ControllerConfig) -> Result<Self, ControllerError> {
        let mut controller = Self {
            transport,
            objects: ObjectListCache::new(),
            last_event: None,
            sequence: 0,
            strict: config.strict,
            state: SessionState::Active,
        };
        controller.reset(&config.initialize)?;
        Ok(controller)
    }

    /// Connect to an engine host listening on a FIFO pair.
    pub fn connect_fifos(
        to_engine: &Path,
        from_engine: &Path,
        config: ControllerConfig,
    ) -> Result<Self, ControllerError> {
        let transport = PipeTransport::open_fifos(to_engine, from_engine, config.timeout)?;
        Self::new(Box::new(transport), config)
    }

    /// Connect to an engine host serving HTTP at `base_url`.
    pub fn connect_http(base_url: &str, config: ControllerConfig) -> Result<Self, ControllerError> {
        let transport = HttpTransport::new(base_url, config.timeout)?;
        Self::new(Box::new(transport), config)
    }

    /// Re-initialise the session: scene, agents, cameras, filter and cache.
    pub fn reset(&mut self, options: &InitializeOptions) -> Result<&Event, ControllerError> {
        let request = options.to_request()?;
        info!("resetting session (scene {:?})", options.scene);
        self.step(&request)
    }

    /// Run one action.  `request` is only read; the sequence number is added
    /// to the wire copy.
    pub fn step(&mut self, request: &ActionRequest) -> Result<&Event, ControllerError> {
        self.run(request, self.strict)
    }

    /// Like [`step`](Self::step) but always raising `ActionFailed`.
    pub fn step_strict(&mut self, request: &ActionRequest) -> Result<&Event, ControllerError> {
        self.run(request, true)
    }

    pub fn last_event(&self) -> Option<&Event> {
        self.last_event.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// Sequence number of the last request sent.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// End the session.  Safe after a failure, never blocks on a stalled
    /// engine, and idempotent.
    pub fn stop(&mut self) {
        if self.state == SessionState::Stopped {
            return;
        }
        self.transport.close();
        self.state = SessionState::Stopped;
        info!("session stopped after {} steps", self.sequence);
    }

    fn run(&mut self, request: &ActionRequest, strict: bool) -> Result<&Event, ControllerError> {
        match self.state {
            SessionState::Active => {}
            SessionState::Failed => return Err(ControllerError::SessionFailed),
            SessionState::Stopped => return Err(ControllerError::Stopped),
        }

        self.sequence += 1;
        let payload = encode_action(&request.to_wire(self.sequence))?;
        let event = match self.exchange(&payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("{} failed at sequence {}: {}", request.action, self.sequence, e);
                self.state = SessionState::Failed;
                return Err(e);
            }
        };

        let raised = match event.error_code() {
            Some(code) if code.is_dispatch_failure() => Some(ControllerError::Dispatch {
                code,
                message: event.error_message().to_string(),
            }),
            Some(code) if strict => Some(ControllerError::ActionFailed {
                code,
                message: event.error_message().to_string(),
            }),
            _ => None,
        };
        if let Some(e) = &raised {
            debug!("{} raised: {}", request.action, e);
        }
        let event = &*self.last_event.insert(event);
        match raised {
            Some(e) => Err(e),
            None => Ok(event),
        }
    }

    fn exchange(&mut self, payload: &[u8]) -> Result<Event, ControllerError> {
        let bytes = self.transport.round_trip(payload)?;
        let response = decode_response(bytes, &mut self.objects)?;
        if response.metadata.sequence_id != self.sequence {
            return Err(CodecError::SequenceMismatch {
                expected: self.sequence,
                actual: response.metadata.sequence_id,
            }
            .into());
        }
        Ok(Event::from_response(response)?)
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("state", &self.state)
            .field("sequence", &self.sequence)
            .field("strict", &self.strict)
            .finish()
    }
}
