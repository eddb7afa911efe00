//! Network link state machine.
//!
//! Tracks the connectivity establisher's progress with validated transitions.
//!
//! # Design
//!
//! - **Forward-only**: `Disconnected` -> `Connecting` -> `Connected`.
//! - **Single failure edge**: any state may fall back to `Disconnected`;
//!   doing so clears the selected interface and network.
//! - **No shortcut**: `Disconnected` -> `Connected` is rejected, even when the
//!   very first probe succeeds.
//!
//! The establisher owns the state; the flow controller only reads it.

use std::fmt;

use thiserror::Error;
use tracing::debug;

/// Connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl LinkState {
    /// The only state reachable from `self` without failing.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Disconnected => Some(Self::Connecting),
            Self::Connecting => Some(Self::Connected),
            Self::Connected => None,
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Rejected state changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkTransitionError {
    #[error("Cannot move from {from} to {to}")]
    Illegal { from: LinkState, to: LinkState },

    #[error("Interface and network can only be chosen while connecting (state is {state})")]
    NotConnecting { state: LinkState },
}

/// Link state plus the operator's choices.
#[derive(Debug, Clone, Default)]
pub struct NetworkState {
    current: LinkState,
    interface: Option<String>,
    network: Option<String>,
    history: Vec<LinkState>,
}

impl NetworkState {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn current(&self) -> LinkState {
        self.current
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.current == LinkState::Connected
    }

    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    pub fn network(&self) -> Option<&str> {
        self.network.as_deref()
    }

    /// Every state entered, in order, not counting the initial one.
    pub fn history(&self) -> &[LinkState] {
        &self.history
    }

    /// `Disconnected` -> `Connecting`.
    pub fn begin(&mut self) -> Result<(), NetworkTransitionError> {
        self.transition_to(LinkState::Connecting)
    }

    /// `Connecting` -> `Connected`.
    pub fn complete(&mut self) -> Result<(), NetworkTransitionError> {
        self.transition_to(LinkState::Connected)
    }

    /// Move to the immediate successor of the current state.
    pub fn transition_to(&mut self, target: LinkState) -> Result<(), NetworkTransitionError> {
        if self.current.next() != Some(target) {
            return Err(NetworkTransitionError::Illegal {
                from: self.current,
                to: target,
            });
        }
        self.enter(target);
        Ok(())
    }

    pub fn select_interface(&mut self, name: &str) -> Result<(), NetworkTransitionError> {
        self.require_connecting()?;
        self.interface = Some(name.to_string());
        Ok(())
    }

    pub fn select_network(&mut self, ssid: &str) -> Result<(), NetworkTransitionError> {
        self.require_connecting()?;
        self.network = Some(ssid.to_string());
        Ok(())
    }

    /// Failure edge: back to `Disconnected`, forgetting the selections.
    pub fn fail(&mut self) {
        self.interface = None;
        self.network = None;
        if self.current != LinkState::Disconnected {
            self.enter(LinkState::Disconnected);
        }
    }

    fn require_connecting(&self) -> Result<(), NetworkTransitionError> {
        if self.current == LinkState::Connecting {
            Ok(())
        } else {
            Err(NetworkTransitionError::NotConnecting { state: self.current })
        }
    }

    fn enter(&mut self, state: LinkState) {
        debug!("Network state: {} -> {}", self.current, state);
        self.current = state;
        self.history.push(state);
    }
}
