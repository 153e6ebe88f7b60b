//! Shared helpers for server tests

use super::escalation::{Escalation, FatalError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Escalation that records failures instead of aborting
#[derive(Default)]
pub struct RecordingEscalation {
    failures: Mutex<Vec<String>>,
}

impl RecordingEscalation {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.failures.lock().unwrap().len()
    }

    pub fn messages(&self) -> Vec<String> {
        self.failures.lock().unwrap().clone()
    }
}

impl Escalation for RecordingEscalation {
    fn escalate(&self, failure: &FatalError) {
        self.failures.lock().unwrap().push(failure.to_string());
    }
}

/// Poll `url` until the server answers
///
/// Retries with exponential backoff, more reliable than a fixed sleep.
pub async fn wait_for_server(url: &str, max_retries: u32) -> reqwest::Client {
    let client = reqwest::Client::new();
    let mut delay = Duration::from_millis(10);

    for attempt in 1..=max_retries {
        match client
            .get(url)
            .timeout(Duration::from_millis(200))
            .send()
            .await
        {
            Ok(_) => return client,
            Err(_) if attempt < max_retries => {
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_millis(200));
            }
            Err(e) => panic!("Server not ready after {} attempts: {}", max_retries, e),
        }
    }
    client
}
