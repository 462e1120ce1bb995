//! Annotation engine for captured screenshots.
//!
//! One [`Engine`] owns a base raster plus an ordered store of vector
//! annotations (pen strokes, shapes, text, redaction blocks) and supports
//! hit-testing, move/delete, destructive crop, display zoom, snapshot-based
//! undo/redo, and export of the flattened composite as PNG.
//!
//! The engine works in logical image coordinates; zoom and pan are
//! presentation-only. All mutators are synchronous and the engine assumes a
//! single logical owner per image.

mod annotation;
mod engine;
mod flatten;
mod history;
mod snapshot;
mod surface;

pub use annotation::{
    distance_to_segment, estimated_text_width, parse_hex_color, Annotation, AnnotationId,
    AnnotationKind, Point, HIT_TOLERANCE,
};
pub use engine::{
    CropOutcome, Engine, Tool, DEFAULT_COLOR, DEFAULT_LINE_WIDTH, MAX_ZOOM, MIN_CROP_SIZE,
    MIN_ZOOM, ZOOM_STEP,
};
pub use flatten::{encode_png, flatten};
pub use history::{HistoryEntry, HistorySnapshot, UndoHistory};
pub use snapshot::EngineSnapshot;
pub use surface::{ImageData, RasterSurface};
