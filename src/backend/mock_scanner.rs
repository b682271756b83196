//! Mock local scanner for testing

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::backend::LocalScanner;
use crate::core::{
    error::{WifiError, WifiResult},
    types::LocalNetwork,
};

#[derive(Debug, Default)]
struct MockState {
    scan_results: Vec<LocalNetwork>,
    should_fail_scan: bool,
}

/// Mock local scanner for testing
#[derive(Debug, Clone, Default)]
pub struct MockLocalScanner {
    inner: Arc<Mutex<MockState>>,
}

impl MockLocalScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure mock to return specific networks on scan
    pub async fn set_scan_results(&self, networks: Vec<LocalNetwork>) {
        self.inner.lock().await.scan_results = networks;
    }

    /// Configure mock to fail scan operations
    pub async fn set_scan_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_scan = should_fail;
    }
}

impl LocalScanner for MockLocalScanner {
    async fn scan(&self) -> WifiResult<Vec<LocalNetwork>> {
        let state = self.inner.lock().await;
        if state.should_fail_scan {
            Err(WifiError::ScanFailed("Mock scan failure".into()))
        } else {
            Ok(state.scan_results.clone())
        }
    }
}
