//! Session lifecycle driven purely by compositor events.

use crate::compositor::{Compositor, CompositorEvent, SessionState};
use crate::error::XrError;

/// Result of draining the event queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PumpOutcome {
    Continue,
    /// The runtime is gone or going; the caller must stop driving frames.
    Stop,
}

#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
    running: bool,
    torn_down: bool,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Unknown,
            running: false,
            torn_down: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Begun and not yet ended: frames may be waited on and submitted.
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Drains every queued event and reacts to state changes.
    pub fn pump<C>(&mut self, compositor: &mut C) -> Result<PumpOutcome, XrError>
    where
        C: Compositor + ?Sized,
    {
        if self.torn_down {
            return Ok(PumpOutcome::Stop);
        }
        while let Some(event) = compositor.poll_event()? {
            match event {
                CompositorEvent::SessionStateChanged { session, state } => {
                    if session != compositor.session_handle() {
                        log::warn!("Ignoring state change to {:?} for unknown session {:#x}", state, session);
                        continue;
                    }
                    if self.on_state_changed(compositor, state)? == PumpOutcome::Stop {
                        return Ok(PumpOutcome::Stop);
                    }
                }
                CompositorEvent::InstanceLossPending => {
                    log::warn!("VR instance loss pending");
                    self.teardown(compositor);
                    return Ok(PumpOutcome::Stop);
                }
                CompositorEvent::EventsLost { count } => {
                    log::warn!("{} VR events lost", count);
                }
                CompositorEvent::Other(what) => {
                    log::debug!("Ignoring VR event: {}", what);
                }
            }
        }
        Ok(PumpOutcome::Continue)
    }

    fn on_state_changed<C>(&mut self, compositor: &mut C, state: SessionState) -> Result<PumpOutcome, XrError>
    where
        C: Compositor + ?Sized,
    {
        log::info!("VR session state {:?} -> {:?}", self.state, state);
        self.state = state;
        match state {
            SessionState::Ready => {
                self.request_begin(compositor)?;
                Ok(PumpOutcome::Continue)
            }
            SessionState::Stopping => {
                self.request_end(compositor)?;
                self.teardown(compositor);
                Ok(PumpOutcome::Stop)
            }
            SessionState::LossPending | SessionState::Exiting => {
                self.teardown(compositor);
                Ok(PumpOutcome::Stop)
            }
            _ => Ok(PumpOutcome::Continue),
        }
    }

    /// Begins the session. Only legal in READY.
    pub fn request_begin<C>(&mut self, compositor: &mut C) -> Result<(), XrError>
    where
        C: Compositor + ?Sized,
    {
        if self.state != SessionState::Ready || self.running {
            return Err(XrError::IllegalTransition {
                action: "begin",
                state: self.state,
            });
        }
        compositor.begin_session()?;
        self.running = true;
        log::info!("VR session begun");
        Ok(())
    }

    /// Ends the session. Only legal in STOPPING.
    pub fn request_end<C>(&mut self, compositor: &mut C) -> Result<(), XrError>
    where
        C: Compositor + ?Sized,
    {
        if self.state != SessionState::Stopping {
            return Err(XrError::IllegalTransition {
                action: "end",
                state: self.state,
            });
        }
        self.running = false;
        compositor.end_session()?;
        log::info!("VR session ended");
        Ok(())
    }

    /// Destroys every runtime object. Safe to call more than once.
    pub fn teardown<C>(&mut self, compositor: &mut C)
    where
        C: Compositor + ?Sized,
    {
        self.running = false;
        if !self.torn_down {
            compositor.destroy();
            self.torn_down = true;
            log::info!("VR runtime resources released");
        }
    }
}
