//! In-memory fakes for collaborator traits (testing only)
//!
//! Provides `ScriptedPatcher`, `ScriptedTransport`, and `RecordingAllocator`
//! that satisfy the trait contracts without any network or runtime.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::collaborator_traits::*;
use crate::error::StateError;

// ---------------------------------------------------------------------------
// ScriptedPatcher
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ScriptedUpdate {
    marker: Option<String>,
    #[serde(default)]
    segments: Option<Vec<String>>,
    files_changed: usize,
}

/// Patcher whose updates are spelled out directly in the body:
/// `{ "marker": "7", "segments": ["a", "b"], "files_changed": 2 }`.
///
/// The protocol switches from `Unknown` to the configured mode on the first
/// applied update, the way a real patcher learns it from the server.
#[derive(Debug, Clone)]
pub struct ScriptedPatcher {
    target_mode: ProtocolMode,
    mode: ProtocolMode,
    marker: Option<String>,
    segments: Vec<String>,
}

impl ScriptedPatcher {
    pub fn new(target_mode: ProtocolMode) -> Self {
        Self {
            target_mode,
            mode: ProtocolMode::Unknown,
            marker: None,
            segments: Vec::new(),
        }
    }

    /// A patcher that already went through some updates.
    pub fn with_state(mode: ProtocolMode, marker: Option<&str>) -> Self {
        Self {
            target_mode: mode,
            mode,
            marker: marker.map(str::to_string),
            segments: Vec::new(),
        }
    }
}

impl Patcher for ScriptedPatcher {
    fn protocol_mode(&self) -> ProtocolMode {
        self.mode
    }

    fn last_applied_marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    fn apply_update(&mut self, body: serde_json::Value) -> StateResult<UpdateResult> {
        let update: ScriptedUpdate = serde_json::from_value(body)?;
        self.mode = self.target_mode;
        if update.marker.is_some() {
            self.marker = update.marker;
        }
        if let Some(segments) = update.segments {
            self.segments = segments;
        }
        Ok(UpdateResult {
            files_changed: update.files_changed,
            total_size: self.segments.iter().map(|s| s.len() as u64).sum(),
        })
    }

    fn artifact_segments(&self) -> Vec<&str> {
        self.segments.iter().map(String::as_str).collect()
    }
}

// ---------------------------------------------------------------------------
// ScriptedTransport
// ---------------------------------------------------------------------------

/// One canned transport outcome.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Body(Vec<u8>),
    Status(u16),
    NetworkDown,
}

impl ScriptedResponse {
    pub fn json(value: serde_json::Value) -> Self {
        ScriptedResponse::Body(value.to_string().into_bytes())
    }
}

#[derive(Debug, Default)]
struct TransportState {
    queues: HashMap<String, VecDeque<ScriptedResponse>>,
    requests: Vec<String>,
    in_flight: HashMap<String, usize>,
    max_in_flight: usize,
}

/// Transport serving queued responses per base locator.
///
/// A request is routed to the longest registered base that prefixes the
/// requested locator. Every requested locator is recorded.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    state: Mutex<TransportState>,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend every fetch for `delay` before answering.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            state: Mutex::default(),
            delay: Some(delay),
        }
    }

    /// Queue a response for requests under `base`.
    pub fn push(&self, base: &str, response: ScriptedResponse) {
        let mut state = self.state.lock().unwrap();
        state
            .queues
            .entry(base.to_string())
            .or_default()
            .push_back(response);
    }

    /// All requested locators, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Highest number of simultaneous fetches observed for a single base.
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    fn route(state: &TransportState, locator: &str) -> Option<String> {
        state
            .queues
            .keys()
            .filter(|base| locator.starts_with(base.as_str()))
            .max_by_key(|base| base.len())
            .cloned()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(&self, locator: &str) -> StateResult<Vec<u8>> {
        let base = {
            let mut state = self.state.lock().unwrap();
            state.requests.push(locator.to_string());
            let base = Self::route(&state, locator).unwrap_or_else(|| locator.to_string());
            let in_flight = state.in_flight.entry(base.clone()).or_default();
            *in_flight += 1;
            let current = *in_flight;
            state.max_in_flight = state.max_in_flight.max(current);
            base
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(in_flight) = state.in_flight.get_mut(&base) {
            *in_flight -= 1;
        }
        let response = state.queues.get_mut(&base).and_then(VecDeque::pop_front);
        match response {
            Some(ScriptedResponse::Body(body)) => Ok(body),
            Some(ScriptedResponse::Status(status)) => Err(StateError::HttpStatus {
                locator: locator.to_string(),
                status,
            }),
            Some(ScriptedResponse::NetworkDown) | None => Err(StateError::Transport {
                locator: locator.to_string(),
                reason: "no scripted response".to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingAllocator
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct AllocatorState {
    next_id: u64,
    live: HashMap<BlobUrl, (String, Vec<u8>)>,
    created: Vec<BlobUrl>,
    revoked: Vec<BlobUrl>,
}

/// Allocator recording every create and revoke call.
///
/// URLs are `blob:fake/<n>` with `n` counting up from 1.
#[derive(Debug, Default)]
pub struct RecordingAllocator {
    state: Mutex<AllocatorState>,
}

impl RecordingAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_count(&self) -> usize {
        self.state.lock().unwrap().created.len()
    }

    pub fn revoke_count(&self) -> usize {
        self.state.lock().unwrap().revoked.len()
    }

    pub fn revoked(&self) -> Vec<BlobUrl> {
        self.state.lock().unwrap().revoked.clone()
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    /// Concatenated content of a live blob.
    pub fn content(&self, url: &BlobUrl) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .live
            .get(url)
            .map(|(_, content)| content.clone())
    }

    pub fn media_type(&self, url: &BlobUrl) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .live
            .get(url)
            .map(|(media_type, _)| media_type.clone())
    }

    /// Drop a blob behind the owner's back, so that its next revoke fails.
    pub fn forget(&self, url: &BlobUrl) {
        self.state.lock().unwrap().live.remove(url);
    }
}

impl ResourceAllocator for RecordingAllocator {
    fn create(&self, parts: Vec<Vec<u8>>, media_type: &str) -> StateResult<ResourceHandle> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let url = BlobUrl::new(format!("blob:fake/{}", state.next_id));
        state
            .live
            .insert(url.clone(), (media_type.to_string(), parts.concat()));
        state.created.push(url.clone());
        Ok(ResourceHandle::new(url))
    }

    fn revoke(&self, handle: ResourceHandle) -> StateResult<()> {
        let mut state = self.state.lock().unwrap();
        let url = handle.url().clone();
        if state.live.remove(&url).is_none() {
            return Err(StateError::UnknownHandle {
                url: url.to_string(),
            });
        }
        state.revoked.push(url);
        Ok(())
    }
}
