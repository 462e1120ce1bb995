use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::annotation::Annotation;
use crate::engine::{Tool, DEFAULT_COLOR, DEFAULT_LINE_WIDTH};
use crate::history::HistoryEntry;

/// Self-contained engine state for external persistence. Every field has a
/// default so partial or older snapshots rehydrate instead of failing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub history: Vec<HistoryEntry>,
    /// Index into `history`; `-1` means no usable history was recorded.
    pub history_step: i64,
    pub current_tool: Tool,
    pub current_color: [u8; 4],
    pub line_width: f32,
    pub annotations: Vec<Annotation>,
    pub zoom_level: f32,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self {
            history: Vec::new(),
            history_step: -1,
            current_tool: Tool::Pen,
            current_color: DEFAULT_COLOR,
            line_width: DEFAULT_LINE_WIDTH,
            annotations: Vec::new(),
            zoom_level: 1.0,
        }
    }
}

impl EngineSnapshot {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("cannot serialize engine snapshot")
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("cannot parse engine snapshot")
    }
}
