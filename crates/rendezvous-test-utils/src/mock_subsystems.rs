//! Mock signaling and relay launchers.
//!
//! Both mocks append to a shared [`EventLog`] so tests can assert the order
//! in which the server starts and releases its subsystems. They can be told
//! to fail at startup, and they keep the fault token they were started with
//! so a test can simulate a runtime fault.
//!
//! # Example
//!
//! ```rust,ignore
//! use rendezvous_test_utils::{EventLog, MockRelay, MockSignaling, SubsystemEvent};
//!
//! let log = EventLog::default();
//! let signaling = Arc::new(MockSignaling::new(log.clone()));
//! let relay = Arc::new(MockRelay::failing(log.clone()));
//!
//! // ... run the server ...
//!
//! assert_eq!(
//!     log.events(),
//!     vec![SubsystemEvent::SignalingStarted, SubsystemEvent::SignalingShutdown]
//! );
//! ```

use async_trait::async_trait;
use rendezvous_service::subsystems::{
    RelayConfig, RelayHandle, RelayLauncher, SignalingConfig, SignalingHandle, SignalingLauncher,
    SubsystemError,
};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Lifecycle events recorded by the mocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsystemEvent {
    SignalingStarted,
    SignalingShutdown,
    RelayStarted,
    RelayClosed,
}

/// Ordered, shared record of subsystem events.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<SubsystemEvent>>>,
}

impl EventLog {
    pub fn push(&self, event: SubsystemEvent) {
        self.events.lock().unwrap().push(event);
    }

    /// Snapshot of all events so far, oldest first.
    pub fn events(&self) -> Vec<SubsystemEvent> {
        self.events.lock().unwrap().clone()
    }
}

/// What a mock launcher remembers about its starts.
#[derive(Debug)]
struct MockState<C> {
    fault: Option<CancellationToken>,
    last_config: Option<C>,
    starts: usize,
}

impl<C> Default for MockState<C> {
    fn default() -> Self {
        Self {
            fault: None,
            last_config: None,
            starts: 0,
        }
    }
}

// ============================================================================
// Signaling
// ============================================================================

/// Mock [`SignalingLauncher`].
#[derive(Debug)]
pub struct MockSignaling {
    log: EventLog,
    fail: bool,
    state: Mutex<MockState<SignalingConfig>>,
}

impl MockSignaling {
    /// A signaling mock that starts successfully.
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            fail: false,
            state: Mutex::new(MockState::default()),
        }
    }

    /// A signaling mock whose start fails with a bind error.
    pub fn failing(log: EventLog) -> Self {
        Self {
            fail: true,
            ..Self::new(log)
        }
    }

    /// Cancel the fault token the server passed in, as a crashed listener
    /// would. Returns false if the mock was never started.
    pub fn trigger_fault(&self) -> bool {
        match &self.state.lock().unwrap().fault {
            Some(fault) => {
                fault.cancel();
                true
            }
            None => false,
        }
    }

    /// Configuration received by the most recent start.
    pub fn last_config(&self) -> Option<SignalingConfig> {
        self.state.lock().unwrap().last_config.clone()
    }

    /// Number of start attempts, including failed ones.
    pub fn start_count(&self) -> usize {
        self.state.lock().unwrap().starts
    }
}

#[async_trait]
impl SignalingLauncher for MockSignaling {
    async fn start(
        &self,
        config: &SignalingConfig,
        fault: CancellationToken,
    ) -> Result<Box<dyn SignalingHandle>, SubsystemError> {
        {
            let mut state = self.state.lock().unwrap();
            state.starts += 1;
            state.last_config = Some(config.clone());
        }

        if self.fail {
            return Err(SubsystemError::Bind {
                addr: config.addr.clone(),
                source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "mock bind failure"),
            });
        }

        self.state.lock().unwrap().fault = Some(fault);
        self.log.push(SubsystemEvent::SignalingStarted);

        Ok(Box::new(MockSignalingHandle {
            log: self.log.clone(),
        }))
    }
}

struct MockSignalingHandle {
    log: EventLog,
}

#[async_trait]
impl SignalingHandle for MockSignalingHandle {
    async fn shutdown(&mut self) {
        self.log.push(SubsystemEvent::SignalingShutdown);
    }
}

// ============================================================================
// Relay
// ============================================================================

/// Mock [`RelayLauncher`].
#[derive(Debug)]
pub struct MockRelay {
    log: EventLog,
    fail: bool,
    state: Mutex<MockState<RelayConfig>>,
}

impl MockRelay {
    /// A relay mock that starts successfully.
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            fail: false,
            state: Mutex::new(MockState::default()),
        }
    }

    /// A relay mock whose start fails with an invalid address error.
    pub fn failing(log: EventLog) -> Self {
        Self {
            fail: true,
            ..Self::new(log)
        }
    }

    /// Cancel the fault token the server passed in. Returns false if the mock
    /// was never started.
    pub fn trigger_fault(&self) -> bool {
        match &self.state.lock().unwrap().fault {
            Some(fault) => {
                fault.cancel();
                true
            }
            None => false,
        }
    }

    /// Configuration received by the most recent start.
    pub fn last_config(&self) -> Option<RelayConfig> {
        self.state.lock().unwrap().last_config.clone()
    }

    /// Number of start attempts, including failed ones.
    pub fn start_count(&self) -> usize {
        self.state.lock().unwrap().starts
    }
}

#[async_trait]
impl RelayLauncher for MockRelay {
    async fn start(
        &self,
        config: &RelayConfig,
        fault: CancellationToken,
    ) -> Result<Box<dyn RelayHandle>, SubsystemError> {
        {
            let mut state = self.state.lock().unwrap();
            state.starts += 1;
            state.last_config = Some(config.clone());
        }

        if self.fail {
            return Err(SubsystemError::InvalidAddress(config.addr.clone()));
        }

        self.state.lock().unwrap().fault = Some(fault);
        self.log.push(SubsystemEvent::RelayStarted);

        Ok(Box::new(MockRelayHandle {
            log: self.log.clone(),
        }))
    }
}

struct MockRelayHandle {
    log: EventLog,
}

#[async_trait]
impl RelayHandle for MockRelayHandle {
    async fn close(&mut self) {
        self.log.push(SubsystemEvent::RelayClosed);
    }
}
