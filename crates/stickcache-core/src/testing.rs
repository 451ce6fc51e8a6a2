//! Test doubles shared by unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CacheError, Result};
use crate::models::{Request, Response};
use crate::network::Origin;

/// Origin with per-key canned responses, scripted failures and call counts.
#[derive(Default)]
pub(crate) struct ScriptedOrigin {
    responses: Mutex<HashMap<String, Response>>,
    failures: Mutex<HashMap<String, u32>>,
    calls: Mutex<HashMap<String, u32>>,
    delay: Mutex<Duration>,
}

impl ScriptedOrigin {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(&self, key: &str, response: Response) {
        self.responses
            .lock()
            .unwrap()
            .insert(key.to_string(), response);
    }

    pub(crate) fn fail_next(&self, key: &str, times: u32) {
        self.failures.lock().unwrap().insert(key.to_string(), times);
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub(crate) fn calls(&self, key: &str) -> u32 {
        self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Origin for ScriptedOrigin {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(request.key.clone())
            .or_insert(0) += 1;

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&request.key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(CacheError::network(format!("unreachable: {}", request.key)));
                }
            }
        }

        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(&request.key)
            .cloned()
            .unwrap_or_else(|| Response::new(404, "")))
    }
}
