//! JSON delta patcher
//!
//! Default `Patcher` implementation understanding the two delta formats a
//! bundler dev server may speak:
//!
//! - **Legacy**: `{ "id", "reset"?, "pre", "post", "delta" }` where each list
//!   holds `[moduleId, code | null]` pairs and `null` removes a module.
//! - **Revision based**: a base revision
//!   `{ "revisionId", "base": true, "pre", "post", "modules" }` followed by
//!   incremental revisions
//!   `{ "revisionId", "base": false, "added", "modified", "deleted" }`.
//!
//! The first update fixes the protocol for the lineage. Every body is fully
//! decoded before any state is touched, so a rejected body leaves the
//! artifact exactly as it was.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;

use crate::collaborator_traits::{Patcher, ProtocolMode, StateResult, UpdateResult};
use crate::error::StateError;

type ModuleId = u64;

#[derive(Debug, Deserialize)]
struct LegacyDelta {
    id: String,
    #[serde(default)]
    reset: bool,
    #[serde(default)]
    pre: Vec<(ModuleId, Option<String>)>,
    #[serde(default)]
    post: Vec<(ModuleId, Option<String>)>,
    #[serde(default)]
    delta: Vec<(ModuleId, Option<String>)>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevisionDelta {
    revision_id: String,
    base: bool,
    #[serde(default)]
    pre: String,
    #[serde(default)]
    post: String,
    #[serde(default)]
    modules: Vec<(ModuleId, String)>,
    #[serde(default)]
    added: Vec<(ModuleId, String)>,
    #[serde(default)]
    modified: Vec<(ModuleId, String)>,
    #[serde(default)]
    deleted: Vec<ModuleId>,
}

/// Reconstructs a bundle from JSON change descriptions.
#[derive(Debug, Default)]
pub struct JsonDeltaPatcher {
    mode: ProtocolMode,
    marker: Option<String>,
    pre: BTreeMap<ModuleId, String>,
    modules: BTreeMap<ModuleId, String>,
    post: BTreeMap<ModuleId, String>,
    last_result: Option<UpdateResult>,
}

impl JsonDeltaPatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Result of the most recent successfully applied update.
    pub fn last_result(&self) -> Option<UpdateResult> {
        self.last_result
    }

    fn total_size(&self) -> u64 {
        self.artifact_segments()
            .iter()
            .map(|segment| segment.len() as u64)
            .sum()
    }

    fn apply_legacy(&mut self, delta: LegacyDelta) -> usize {
        if delta.reset {
            self.pre.clear();
            self.modules.clear();
            self.post.clear();
        }
        let files_changed = delta.pre.len() + delta.post.len() + delta.delta.len();
        patch_map(&mut self.pre, delta.pre);
        patch_map(&mut self.post, delta.post);
        patch_map(&mut self.modules, delta.delta);
        self.marker = Some(delta.id);
        files_changed
    }

    fn apply_revision(&mut self, delta: RevisionDelta) -> StateResult<usize> {
        if delta.base {
            self.pre = single_segment(delta.pre);
            self.post = single_segment(delta.post);
            let files_changed = delta.modules.len();
            self.modules = delta.modules.into_iter().collect();
            self.marker = Some(delta.revision_id);
            return Ok(files_changed);
        }

        if self.marker.is_none() {
            return Err(StateError::MissingBase);
        }
        let files_changed = delta.added.len() + delta.modified.len() + delta.deleted.len();
        self.modules.extend(delta.added);
        self.modules.extend(delta.modified);
        for id in delta.deleted {
            self.modules.remove(&id);
        }
        self.marker = Some(delta.revision_id);
        Ok(files_changed)
    }
}

fn patch_map(target: &mut BTreeMap<ModuleId, String>, patch: Vec<(ModuleId, Option<String>)>) {
    for (id, code) in patch {
        match code {
            Some(code) => {
                target.insert(id, code);
            }
            None => {
                target.remove(&id);
            }
        }
    }
}

fn single_segment(code: String) -> BTreeMap<ModuleId, String> {
    let mut map = BTreeMap::new();
    if !code.is_empty() {
        map.insert(0, code);
    }
    map
}

impl Patcher for JsonDeltaPatcher {
    fn protocol_mode(&self) -> ProtocolMode {
        self.mode
    }

    fn last_applied_marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    fn apply_update(&mut self, body: serde_json::Value) -> StateResult<UpdateResult> {
        if !body.is_object() {
            return Err(StateError::Decoding(
                "change description must be a JSON object".to_string(),
            ));
        }

        let format = if body.get("id").is_some() {
            ProtocolMode::Legacy
        } else {
            ProtocolMode::RevisionBased
        };
        if self.mode != ProtocolMode::Unknown && self.mode != format {
            return Err(StateError::FormatChanged {
                expected: self.mode.to_string(),
                actual: format.to_string(),
            });
        }

        let files_changed = match format {
            ProtocolMode::Legacy => {
                let delta: LegacyDelta = serde_json::from_value(body)?;
                self.apply_legacy(delta)
            }
            ProtocolMode::RevisionBased | ProtocolMode::Unknown => {
                let delta: RevisionDelta = serde_json::from_value(body)?;
                self.apply_revision(delta)?
            }
        };
        self.mode = format;

        let result = UpdateResult {
            files_changed,
            total_size: self.total_size(),
        };
        debug!(
            mode = %self.mode,
            marker = ?self.marker,
            files_changed = result.files_changed,
            total_size = result.total_size,
            "delta applied"
        );
        self.last_result = Some(result);
        Ok(result)
    }

    fn artifact_segments(&self) -> Vec<&str> {
        self.pre
            .values()
            .chain(self.modules.values())
            .chain(self.post.values())
            .map(String::as_str)
            .collect()
    }
}
