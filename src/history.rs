use serde::{Deserialize, Serialize};

use crate::annotation::Annotation;
use crate::surface::ImageData;

/// One committed engine state: the rendered composite, a deep copy of the
/// annotation store, and the base image with its dimensions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySnapshot {
    pub rendered: ImageData,
    pub annotations: Vec<Annotation>,
    pub base_image: ImageData,
    pub canvas_width: u32,
    pub canvas_height: u32,
}

/// A history entry is either a full snapshot (current format) or a bare
/// encoded bitmap (legacy format). Untagged: an object is a snapshot, a
/// string is a legacy raster.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HistoryEntry {
    Full(HistorySnapshot),
    Raster(ImageData),
}

impl HistoryEntry {
    pub fn annotations(&self) -> Option<&[Annotation]> {
        match self {
            HistoryEntry::Full(snapshot) => Some(&snapshot.annotations),
            HistoryEntry::Raster(_) => None,
        }
    }
}

/// Cursor over a snapshot stack. The cursor always points at a valid entry;
/// pushing after an undo discards the redo branch first.
#[derive(Clone, Debug)]
pub struct UndoHistory<T: Clone> {
    stack: Vec<T>,
    cursor: usize,
}

impl<T: Clone> UndoHistory<T> {
    pub fn new(initial: T) -> Self {
        Self {
            stack: vec![initial],
            cursor: 0,
        }
    }

    pub fn from_parts(stack: Vec<T>, cursor: usize) -> Option<Self> {
        if stack.is_empty() || cursor >= stack.len() {
            return None;
        }
        Some(Self { stack, cursor })
    }

    pub fn push_snapshot(&mut self, value: T) {
        if self.cursor + 1 < self.stack.len() {
            self.stack.truncate(self.cursor + 1);
        }
        self.stack.push(value);
        self.cursor = self.stack.len() - 1;
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.stack.len()
    }

    pub fn undo(&mut self) -> Option<T> {
        if !self.can_undo() {
            return None;
        }
        self.cursor -= 1;
        Some(self.stack[self.cursor].clone())
    }

    pub fn redo(&mut self) -> Option<T> {
        if !self.can_redo() {
            return None;
        }
        self.cursor += 1;
        Some(self.stack[self.cursor].clone())
    }

    pub fn clear_with(&mut self, value: T) {
        self.stack.clear();
        self.stack.push(value);
        self.cursor = 0;
    }

    pub fn current(&self) -> &T {
        &self.stack[self.cursor]
    }

    pub fn entries(&self) -> &[T] {
        &self.stack
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}
