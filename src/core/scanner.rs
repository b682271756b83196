//! Host-side Wi-Fi scan service with state machine

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{
    backend::LocalScanner,
    core::{
        error::{ServiceError, ServiceResult},
        types::{LocalNetwork, ScanState},
    },
};

/// Scan state machine
#[derive(Debug)]
struct ScanStateMachine {
    state: ScanState,
    results: Option<Vec<LocalNetwork>>,
    error: Option<String>,
}

impl ScanStateMachine {
    fn new() -> Self {
        Self {
            state: ScanState::Idle,
            results: None,
            error: None,
        }
    }

    fn start_scan(&mut self) -> ServiceResult<()> {
        if self.state == ScanState::Scanning {
            return Err(ServiceError::AlreadyRunning);
        }
        self.state = ScanState::Scanning;
        self.results = None;
        self.error = None;
        Ok(())
    }

    fn complete_scan(&mut self, networks: Vec<LocalNetwork>) {
        self.state = ScanState::Finished;
        self.results = Some(networks);
    }

    fn fail_scan(&mut self, error: String) {
        self.state = ScanState::Error;
        self.error = Some(error);
    }

    fn state(&self) -> ScanState {
        self.state
    }
}

/// Wi-Fi scan of the host, used for network suggestions
pub struct LocalScanService<S: LocalScanner> {
    scanner: Arc<S>,
    state_machine: Arc<RwLock<ScanStateMachine>>,
}

impl<S: LocalScanner> LocalScanService<S> {
    pub fn new(scanner: Arc<S>) -> Self {
        Self {
            scanner,
            state_machine: Arc::new(RwLock::new(ScanStateMachine::new())),
        }
    }

    /// Start a scan in the background
    ///
    /// Returns an error if a scan is already in progress
    pub async fn start_scan(&self) -> ServiceResult<()> {
        self.state_machine.write().await.start_scan()?;

        let scanner = self.scanner.clone();
        let state_machine = self.state_machine.clone();

        tokio::spawn(async move {
            match scanner.scan().await {
                Ok(networks) => {
                    debug!("Local scan found {} networks", networks.len());
                    state_machine.write().await.complete_scan(networks);
                }
                Err(e) => {
                    warn!("Local scan failed: {}", e);
                    state_machine.write().await.fail_scan(e.to_string());
                }
            }
        });

        Ok(())
    }

    pub async fn state(&self) -> ScanState {
        self.state_machine.read().await.state()
    }

    /// Error of the last failed scan
    pub async fn last_error(&self) -> Option<String> {
        self.state_machine.read().await.error.clone()
    }

    /// Networks of the last finished scan, `None` while none is available
    pub async fn results(&self) -> Option<Vec<LocalNetwork>> {
        self.state_machine.read().await.results.clone()
    }
}
