use anyhow::{Context, Result};
use image::DynamicImage;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::annotation::{Annotation, AnnotationId, AnnotationKind, Point};
use crate::flatten;
use crate::history::{HistoryEntry, HistorySnapshot, UndoHistory};
use crate::snapshot::EngineSnapshot;
use crate::surface::{ImageData, RasterSurface};

pub const MIN_ZOOM: f32 = 0.25;
pub const MAX_ZOOM: f32 = 4.0;
pub const ZOOM_STEP: f32 = 0.25;
pub const MIN_CROP_SIZE: f32 = 10.0;
pub const DEFAULT_COLOR: [u8; 4] = [255, 0, 0, 255];
pub const DEFAULT_LINE_WIDTH: f32 = 3.0;

const TEXT_SIZE_FACTOR: f32 = 5.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Pen,
    Rectangle,
    Circle,
    Arrow,
    Text,
    Blackout,
    Move,
    Crop,
    Pan,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CropOutcome {
    /// No committed crop selection; nothing happened.
    Inactive,
    /// Selection below the minimum size; state untouched.
    TooSmall,
    Applied,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DragMode {
    Draw,
    Move,
    Crop,
    Pan,
}

#[derive(Clone, Debug)]
struct DragState {
    mode: DragMode,
    start: Point,
    current: Point,
    pen_points: Vec<Point>,
    selection_id: Option<AnnotationId>,
    original: Option<Annotation>,
    pan_origin: (f32, f32),
}

impl DragState {
    fn begin(mode: DragMode, at: Point) -> Self {
        Self {
            mode,
            start: at,
            current: at,
            pen_points: Vec::new(),
            selection_id: None,
            original: None,
            pan_origin: (0.0, 0.0),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct CropSelection {
    start: Point,
    end: Point,
    committed: bool,
}

/// Stateful annotation engine over one captured raster. One instance per
/// image; the engine is the sole mutator of its surface and store.
pub struct Engine {
    surface: RasterSurface,
    annotations: Vec<Annotation>,
    history: UndoHistory<HistoryEntry>,
    current_tool: Tool,
    current_color: [u8; 4],
    line_width: f32,
    zoom_level: f32,
    view_offset: (f32, f32),
    selected: Option<AnnotationId>,
    drag: Option<DragState>,
    crop: Option<CropSelection>,
    next_id: AnnotationId,
}

impl Engine {
    /// Builds an engine over an encoded raster (PNG and friends).
    pub fn new(raster: &[u8]) -> Result<Self> {
        Self::from_image_data(ImageData::new(raster.to_vec()))
    }

    /// Accepts base64 or `data:image/...;base64,` input.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        Self::from_image_data(ImageData::from_base64(encoded)?)
    }

    fn from_image_data(data: ImageData) -> Result<Self> {
        let surface =
            RasterSurface::from_encoded(data).context("cannot decode initial raster")?;
        let initial = HistoryEntry::Full(HistorySnapshot {
            rendered: surface.export_png()?,
            annotations: Vec::new(),
            base_image: surface.base_encoded().clone(),
            canvas_width: surface.width(),
            canvas_height: surface.height(),
        });
        Ok(Self {
            surface,
            annotations: Vec::new(),
            history: UndoHistory::new(initial),
            current_tool: Tool::Pen,
            current_color: DEFAULT_COLOR,
            line_width: DEFAULT_LINE_WIDTH,
            zoom_level: 1.0,
            view_offset: (0.0, 0.0),
            selected: None,
            drag: None,
            crop: None,
            next_id: 1,
        })
    }

    pub fn width(&self) -> u32 {
        self.surface.width()
    }

    pub fn height(&self) -> u32 {
        self.surface.height()
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn tool(&self) -> Tool {
        self.current_tool
    }

    pub fn color(&self) -> [u8; 4] {
        self.current_color
    }

    pub fn line_width(&self) -> f32 {
        self.line_width
    }

    pub fn selected_annotation(&self) -> Option<AnnotationId> {
        self.selected
    }

    pub fn set_tool(&mut self, tool: Tool) {
        info!("tool changed to {:?}", tool);
        self.current_tool = tool;
        self.drag = None;
    }

    pub fn set_color(&mut self, rgba: [u8; 4]) {
        self.current_color = rgba;
    }

    pub fn set_line_width(&mut self, width: f32) {
        self.line_width = width;
    }

    // --- pointer flow -----------------------------------------------------

    /// Pointer coordinates are logical (un-zoomed); callers unproject any
    /// display scale before forwarding events.
    pub fn pointer_down(&mut self, x: f32, y: f32) -> Result<()> {
        let at = Point::new(x, y);
        match self.current_tool {
            Tool::Pen => {
                let mut drag = DragState::begin(DragMode::Draw, at);
                drag.pen_points.push(at);
                self.drag = Some(drag);
            }
            Tool::Rectangle | Tool::Circle | Tool::Arrow | Tool::Blackout => {
                self.drag = Some(DragState::begin(DragMode::Draw, at));
            }
            Tool::Text => {
                // Text entry is not pointer-driven; see add_text.
            }
            Tool::Move => {
                let hit = self
                    .annotations
                    .iter()
                    .rev()
                    .find(|a| a.contains(at))
                    .map(|a| a.id);
                self.selected = hit;
                if let Some(id) = hit {
                    let original = self.annotations.iter().find(|a| a.id == id).cloned();
                    let mut drag = DragState::begin(DragMode::Move, at);
                    drag.selection_id = Some(id);
                    drag.original = original;
                    self.drag = Some(drag);
                    debug!("move started on annotation {id}");
                }
            }
            Tool::Crop => {
                self.crop = Some(CropSelection {
                    start: at,
                    end: at,
                    committed: false,
                });
                self.drag = Some(DragState::begin(DragMode::Crop, at));
            }
            Tool::Pan => {
                let mut drag = DragState::begin(DragMode::Pan, at);
                drag.pan_origin = self.view_offset;
                self.drag = Some(drag);
            }
        }
        Ok(())
    }

    pub fn pointer_move(&mut self, x: f32, y: f32) -> Result<()> {
        let at = Point::new(x, y);
        let Some(drag) = self.drag.as_mut() else {
            return Ok(());
        };
        drag.current = at;
        match drag.mode {
            DragMode::Draw => {
                if self.current_tool == Tool::Pen {
                    drag.pen_points.push(at);
                }
            }
            DragMode::Move => {}
            DragMode::Crop => {
                if let Some(selection) = self.crop.as_mut() {
                    selection.end = at;
                }
            }
            DragMode::Pan => {
                self.view_offset = (
                    drag.pan_origin.0 + (at.x - drag.start.x),
                    drag.pan_origin.1 + (at.y - drag.start.y),
                );
            }
        }
        Ok(())
    }

    pub fn pointer_up(&mut self, x: f32, y: f32) -> Result<()> {
        let at = Point::new(x, y);
        let Some(drag) = self.drag.take() else {
            return Ok(());
        };
        match drag.mode {
            DragMode::Draw => {
                let kind = match self.current_tool {
                    Tool::Pen => AnnotationKind::Pen {
                        points: drag.pen_points,
                    },
                    Tool::Rectangle => AnnotationKind::Rectangle {
                        start: drag.start,
                        end: at,
                    },
                    Tool::Circle => AnnotationKind::Circle {
                        start: drag.start,
                        end: at,
                    },
                    Tool::Arrow => AnnotationKind::Arrow {
                        start: drag.start,
                        end: at,
                    },
                    Tool::Blackout => AnnotationKind::Blackout {
                        start: drag.start,
                        end: at,
                    },
                    _ => return Ok(()),
                };
                let id = self.next_annotation_id();
                let annotation = Annotation {
                    id,
                    kind,
                    color: self.current_color,
                    line_width: self.line_width,
                };
                debug!(
                    "added {} annotation, total: {}",
                    annotation.label(),
                    self.annotations.len() + 1
                );
                self.annotations.push(annotation);
                self.commit()?;
            }
            DragMode::Move => {
                if let Some(id) = drag.selection_id {
                    let dx = at.x - drag.start.x;
                    let dy = at.y - drag.start.y;
                    if let Some(annotation) =
                        self.annotations.iter_mut().find(|a| a.id == id)
                    {
                        if let Some(original) = drag.original {
                            *annotation = original;
                        }
                        annotation.translate(dx, dy);
                    }
                    self.commit()?;
                }
            }
            DragMode::Crop => {
                if let Some(selection) = self.crop.as_mut() {
                    selection.end = at;
                    selection.committed = true;
                    debug!(
                        "crop selection completed: ({:.0}, {:.0}) to ({:.0}, {:.0})",
                        selection.start.x, selection.start.y, selection.end.x, selection.end.y
                    );
                }
            }
            DragMode::Pan => {}
        }
        Ok(())
    }

    /// Current frame for display: the committed composite plus any
    /// in-progress shape or live-translated move. Never mutates the store.
    pub fn preview(&self) -> Result<DynamicImage> {
        let Some(drag) = &self.drag else {
            return Ok(self.surface.rendered().clone());
        };
        match drag.mode {
            DragMode::Draw => {
                let mut scratch = self.annotations.clone();
                if let Some(ghost) = self.in_progress_annotation(drag) {
                    scratch.push(ghost);
                }
                flatten::flatten(self.surface.base(), &scratch)
            }
            DragMode::Move => {
                let mut scratch = self.annotations.clone();
                if let (Some(id), Some(original)) = (drag.selection_id, &drag.original) {
                    if let Some(slot) = scratch.iter_mut().find(|a| a.id == id) {
                        *slot = original.clone();
                        slot.translate(
                            drag.current.x - drag.start.x,
                            drag.current.y - drag.start.y,
                        );
                    }
                }
                flatten::flatten(self.surface.base(), &scratch)
            }
            DragMode::Crop | DragMode::Pan => Ok(self.surface.rendered().clone()),
        }
    }

    fn in_progress_annotation(&self, drag: &DragState) -> Option<Annotation> {
        let kind = match self.current_tool {
            Tool::Pen => AnnotationKind::Pen {
                points: drag.pen_points.clone(),
            },
            Tool::Rectangle => AnnotationKind::Rectangle {
                start: drag.start,
                end: drag.current,
            },
            Tool::Circle => AnnotationKind::Circle {
                start: drag.start,
                end: drag.current,
            },
            Tool::Arrow => AnnotationKind::Arrow {
                start: drag.start,
                end: drag.current,
            },
            Tool::Blackout => AnnotationKind::Blackout {
                start: drag.start,
                end: drag.current,
            },
            _ => return None,
        };
        Some(Annotation {
            id: 0,
            kind,
            color: self.current_color,
            line_width: self.line_width,
        })
    }

    // --- direct mutators --------------------------------------------------

    /// Appends a text annotation anchored at the baseline `(x, y)` and
    /// commits. The empty string is ignored; whitespace-only text is
    /// accepted verbatim.
    pub fn add_text(&mut self, x: f32, y: f32, text: &str) -> Result<Option<AnnotationId>> {
        if text.is_empty() {
            return Ok(None);
        }
        let id = self.next_annotation_id();
        self.annotations.push(Annotation {
            id,
            kind: AnnotationKind::Text {
                pos: Point::new(x, y),
                content: text.to_owned(),
                font_size: self.line_width * TEXT_SIZE_FACTOR,
            },
            color: self.current_color,
            line_width: self.line_width,
        });
        debug!("added text annotation, total: {}", self.annotations.len());
        self.commit()?;
        Ok(Some(id))
    }

    pub fn find_annotation_at(&self, x: f32, y: f32) -> Option<&Annotation> {
        let at = Point::new(x, y);
        self.annotations.iter().rev().find(|a| a.contains(at))
    }

    pub fn delete_selected_annotation(&mut self) -> Result<()> {
        let Some(id) = self.selected.take() else {
            return Ok(());
        };
        self.annotations.retain(|a| a.id != id);
        debug!("deleted annotation {id}, total: {}", self.annotations.len());
        self.commit()
    }

    /// Drops all annotations and restarts history from the bare image.
    pub fn clear(&mut self) -> Result<()> {
        self.annotations.clear();
        self.selected = None;
        self.drag = None;
        self.surface.redraw(&self.annotations)?;
        let entry = self.capture_entry()?;
        self.history.clear_with(entry);
        info!("annotations cleared");
        Ok(())
    }

    // --- history ----------------------------------------------------------

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn undo(&mut self) -> Result<()> {
        let Some(entry) = self.history.undo() else {
            return Ok(());
        };
        self.restore_entry(entry)
    }

    pub fn redo(&mut self) -> Result<()> {
        let Some(entry) = self.history.redo() else {
            return Ok(());
        };
        self.restore_entry(entry)
    }

    fn restore_entry(&mut self, entry: HistoryEntry) -> Result<()> {
        match entry {
            HistoryEntry::Full(snapshot) => {
                self.annotations = snapshot.annotations;
                self.surface.replace_base(snapshot.base_image)?;
                self.surface.redraw(&self.annotations)?;
            }
            HistoryEntry::Raster(data) => {
                // Legacy raster-only entry: annotations and dimensions stay.
                self.surface.restore_raster(&data)?;
            }
        }
        self.selected = None;
        Ok(())
    }

    fn capture_entry(&self) -> Result<HistoryEntry> {
        Ok(HistoryEntry::Full(HistorySnapshot {
            rendered: self.surface.export_png()?,
            annotations: self.annotations.clone(),
            base_image: self.surface.base_encoded().clone(),
            canvas_width: self.surface.width(),
            canvas_height: self.surface.height(),
        }))
    }

    /// Redraws the surface from the store and pushes one history entry.
    fn commit(&mut self) -> Result<()> {
        self.surface.redraw(&self.annotations)?;
        let entry = self.capture_entry()?;
        self.history.push_snapshot(entry);
        Ok(())
    }

    // --- crop -------------------------------------------------------------

    pub fn apply_crop(&mut self) -> Result<CropOutcome> {
        let Some(selection) = self.crop else {
            return Ok(CropOutcome::Inactive);
        };
        if !selection.committed {
            return Ok(CropOutcome::Inactive);
        }

        let x1 = selection.start.x.min(selection.end.x);
        let y1 = selection.start.y.min(selection.end.y);
        let x2 = selection.start.x.max(selection.end.x);
        let y2 = selection.start.y.max(selection.end.y);
        if x2 - x1 < MIN_CROP_SIZE || y2 - y1 < MIN_CROP_SIZE {
            warn!(
                "crop selection {:.0}x{:.0} is below the {MIN_CROP_SIZE} px minimum",
                x2 - x1,
                y2 - y1
            );
            return Ok(CropOutcome::TooSmall);
        }

        let x1 = x1.max(0.0);
        let y1 = y1.max(0.0);
        let x2 = x2.min(self.surface.width() as f32);
        let y2 = y2.min(self.surface.height() as f32);
        let width = (x2 - x1).floor();
        let height = (y2 - y1).floor();
        if width < 1.0 || height < 1.0 {
            warn!("crop selection lies outside the canvas");
            return Ok(CropOutcome::TooSmall);
        }

        // The cropped composite becomes the new base image; annotations are
        // remapped on top of it.
        let new_base =
            self.surface
                .crop_rendered(x1 as u32, y1 as u32, width as u32, height as u32)?;
        self.annotations = self
            .annotations
            .iter()
            .filter_map(|a| a.adjust_for_crop(x1, y1, width, height))
            .collect();
        self.surface.replace_base(new_base)?;
        self.crop = None;
        self.commit()?;
        info!("crop applied: {width:.0}x{height:.0} at ({x1:.0}, {y1:.0})");
        Ok(CropOutcome::Applied)
    }

    pub fn cancel_crop(&mut self) {
        if self.crop.take().is_some() {
            debug!("crop cancelled");
        }
        if self
            .drag
            .as_ref()
            .is_some_and(|drag| drag.mode == DragMode::Crop)
        {
            self.drag = None;
        }
    }

    /// Pending crop selection, normalized, for UI overlays.
    pub fn crop_selection(&self) -> Option<(Point, Point)> {
        let selection = self.crop?;
        Some((
            Point::new(
                selection.start.x.min(selection.end.x),
                selection.start.y.min(selection.end.y),
            ),
            Point::new(
                selection.start.x.max(selection.end.x),
                selection.start.y.max(selection.end.y),
            ),
        ))
    }

    // --- zoom and pan (presentation only) ---------------------------------

    pub fn set_zoom(&mut self, level: f32) -> f32 {
        let level = if level.is_nan() { MIN_ZOOM } else { level };
        self.zoom_level = level.clamp(MIN_ZOOM, MAX_ZOOM);
        self.zoom_level
    }

    pub fn zoom_in(&mut self) -> f32 {
        self.set_zoom(self.zoom_level + ZOOM_STEP)
    }

    pub fn zoom_out(&mut self) -> f32 {
        self.set_zoom(self.zoom_level - ZOOM_STEP)
    }

    pub fn zoom_reset(&mut self) -> f32 {
        self.set_zoom(1.0)
    }

    pub fn zoom_level(&self) -> f32 {
        self.zoom_level
    }

    pub fn pan_by(&mut self, dx: f32, dy: f32) {
        self.view_offset.0 += dx;
        self.view_offset.1 += dy;
    }

    pub fn view_offset(&self) -> (f32, f32) {
        self.view_offset
    }

    // --- export and snapshots ---------------------------------------------

    /// Final composited raster, encoded as PNG.
    pub fn annotated_image(&self) -> Result<ImageData> {
        self.surface.export_png()
    }

    /// Deep-copied, self-contained snapshot of the engine state.
    pub fn state(&self) -> EngineSnapshot {
        EngineSnapshot {
            history: self.history.entries().to_vec(),
            history_step: self.history.cursor() as i64,
            current_tool: self.current_tool,
            current_color: self.current_color,
            line_width: self.line_width,
            annotations: self.annotations.clone(),
            zoom_level: self.zoom_level,
        }
    }

    /// Rehydrates a snapshot produced by `state` (or an older persisted
    /// shape). `None` is a no-op.
    pub fn restore_state(&mut self, snapshot: Option<EngineSnapshot>) -> Result<()> {
        let Some(snapshot) = snapshot else {
            return Ok(());
        };
        debug!(
            "restoring snapshot: {} annotations, {} history entries, step {}",
            snapshot.annotations.len(),
            snapshot.history.len(),
            snapshot.history_step
        );

        self.current_tool = snapshot.current_tool;
        self.current_color = snapshot.current_color;
        self.line_width = snapshot.line_width;
        self.annotations = snapshot.annotations;
        self.set_zoom(snapshot.zoom_level);
        self.selected = None;
        self.drag = None;
        self.crop = None;
        self.next_id = next_id_after(&snapshot.history, &self.annotations);

        if snapshot.history.is_empty() || snapshot.history_step < 0 {
            // No usable history: reseed from the rehydrated store.
            self.surface.redraw(&self.annotations)?;
            let entry = self.capture_entry()?;
            self.history.clear_with(entry);
            return Ok(());
        }

        let cursor = (snapshot.history_step as usize).min(snapshot.history.len() - 1);
        self.history = UndoHistory::from_parts(snapshot.history, cursor)
            .context("history cannot be empty")?;
        match self.history.current().clone() {
            HistoryEntry::Full(current) => {
                self.surface.replace_base(current.base_image)?;
                self.surface.redraw(&self.annotations)?;
            }
            HistoryEntry::Raster(data) => {
                self.surface.restore_raster(&data)?;
            }
        }
        Ok(())
    }

    fn next_annotation_id(&mut self) -> AnnotationId {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        id
    }
}

fn next_id_after(history: &[HistoryEntry], annotations: &[Annotation]) -> AnnotationId {
    let mut max_id = 0;
    for annotation in annotations {
        max_id = max_id.max(annotation.id);
    }
    for entry in history {
        if let Some(list) = entry.annotations() {
            for annotation in list {
                max_id = max_id.max(annotation.id);
            }
        }
    }
    max_id + 1
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, RgbaImage};

    use super::{CropOutcome, Engine, Tool, MAX_ZOOM, MIN_ZOOM};
    use crate::annotation::{AnnotationKind, Point};
    use crate::flatten;
    use crate::history::HistoryEntry;
    use crate::snapshot::EngineSnapshot;
    use crate::surface::ImageData;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            image::Rgba([255, 255, 255, 255]),
        ));
        flatten::encode_png(&image).expect("encode test image")
    }

    fn engine(width: u32, height: u32) -> Engine {
        Engine::new(&png_bytes(width, height)).expect("engine")
    }

    fn draw_rect(engine: &mut Engine, from: (f32, f32), to: (f32, f32)) {
        engine.set_tool(Tool::Rectangle);
        engine.pointer_down(from.0, from.1).unwrap();
        engine
            .pointer_move((from.0 + to.0) / 2.0, (from.1 + to.1) / 2.0)
            .unwrap();
        engine.pointer_up(to.0, to.1).unwrap();
    }

    fn rect_corners(engine: &Engine, index: usize) -> (Point, Point) {
        match engine.annotations()[index].kind {
            AnnotationKind::Rectangle { start, end } => (start, end),
            _ => panic!("expected rectangle"),
        }
    }

    #[test]
    fn new_engine_has_defaults() {
        let engine = engine(800, 600);
        assert_eq!(engine.tool(), Tool::Pen);
        assert_eq!(engine.color(), [255, 0, 0, 255]);
        assert_eq!(engine.line_width(), 3.0);
        assert_eq!(engine.zoom_level(), 1.0);
        assert!(engine.annotations().is_empty());
        assert_eq!(engine.width(), 800);
        assert_eq!(engine.height(), 600);
        assert_eq!(engine.state().history.len(), 1);
        assert!(!engine.can_undo());
        assert!(!engine.can_redo());
    }

    #[test]
    fn rectangle_then_circle_undo_redo() {
        let mut engine = engine(400, 400);

        engine.set_color([255, 0, 0, 255]);
        draw_rect(&mut engine, (10.0, 10.0), (100.0, 100.0));

        engine.set_color([0, 255, 0, 255]);
        engine.set_line_width(2.0);
        engine.set_tool(Tool::Circle);
        engine.pointer_down(50.0, 50.0).unwrap();
        engine.pointer_up(100.0, 50.0).unwrap();

        assert_eq!(engine.annotations().len(), 2);

        engine.undo().unwrap();
        assert_eq!(engine.annotations().len(), 1);
        assert_eq!(engine.annotations()[0].color, [255, 0, 0, 255]);

        engine.redo().unwrap();
        assert_eq!(engine.annotations().len(), 2);
    }

    #[test]
    fn commit_after_undo_discards_redo() {
        let mut engine = engine(300, 300);
        draw_rect(&mut engine, (10.0, 10.0), (50.0, 50.0));
        draw_rect(&mut engine, (60.0, 60.0), (110.0, 110.0));
        assert_eq!(engine.state().history.len(), 3);

        engine.undo().unwrap();
        assert_eq!(engine.annotations().len(), 1);

        engine.add_text(20.0, 20.0, "note").unwrap();
        assert_eq!(engine.state().history.len(), 3);
        assert_eq!(engine.annotations().len(), 2);

        engine.redo().unwrap();
        assert_eq!(engine.annotations().len(), 2);
        assert!(!engine.can_redo());
    }

    #[test]
    fn crop_shifts_contained_annotation() {
        let mut engine = engine(400, 400);
        draw_rect(&mut engine, (100.0, 100.0), (150.0, 150.0));

        engine.set_tool(Tool::Crop);
        engine.pointer_down(50.0, 50.0).unwrap();
        engine.pointer_move(150.0, 150.0).unwrap();
        engine.pointer_up(200.0, 200.0).unwrap();

        let outcome = engine.apply_crop().unwrap();
        assert_eq!(outcome, CropOutcome::Applied);
        assert_eq!(engine.width(), 150);
        assert_eq!(engine.height(), 150);
        assert_eq!(engine.annotations().len(), 1);

        let (start, end) = rect_corners(&engine, 0);
        assert_eq!(start, Point::new(50.0, 50.0));
        assert_eq!(end, Point::new(100.0, 100.0));
    }

    #[test]
    fn undersized_crop_is_rejected() {
        let mut engine = engine(200, 200);
        draw_rect(&mut engine, (20.0, 20.0), (80.0, 80.0));
        let history_before = engine.state().history.len();

        engine.set_tool(Tool::Crop);
        engine.pointer_down(0.0, 0.0).unwrap();
        engine.pointer_up(5.0, 5.0).unwrap();

        let outcome = engine.apply_crop().unwrap();
        assert_eq!(outcome, CropOutcome::TooSmall);
        assert_eq!(engine.width(), 200);
        assert_eq!(engine.height(), 200);
        assert_eq!(engine.annotations().len(), 1);
        assert_eq!(engine.state().history.len(), history_before);
    }

    #[test]
    fn apply_crop_without_selection_is_inactive() {
        let mut engine = engine(100, 100);
        assert_eq!(engine.apply_crop().unwrap(), CropOutcome::Inactive);
    }

    #[test]
    fn cancel_crop_clears_selection_without_mutation() {
        let mut engine = engine(200, 200);
        engine.set_tool(Tool::Crop);
        engine.pointer_down(10.0, 10.0).unwrap();
        engine.pointer_up(150.0, 150.0).unwrap();
        assert!(engine.crop_selection().is_some());

        engine.cancel_crop();
        assert!(engine.crop_selection().is_none());
        assert_eq!(engine.width(), 200);
        assert_eq!(engine.apply_crop().unwrap(), CropOutcome::Inactive);
    }

    #[test]
    fn add_text_rejects_empty_accepts_content() {
        let mut engine = engine(200, 200);

        assert!(engine.add_text(50.0, 50.0, "").unwrap().is_none());
        assert!(engine.annotations().is_empty());

        let id = engine.add_text(50.0, 50.0, "Bug here").unwrap();
        assert!(id.is_some());
        assert_eq!(engine.annotations().len(), 1);
        match &engine.annotations()[0].kind {
            AnnotationKind::Text { content, .. } => assert_eq!(content, "Bug here"),
            _ => panic!("expected text annotation"),
        }

        // Whitespace-only input is accepted verbatim.
        assert!(engine.add_text(60.0, 60.0, "   ").unwrap().is_some());
        assert_eq!(engine.annotations().len(), 2);
    }

    #[test]
    fn zoom_steps_and_clamping() {
        let mut engine = engine(100, 100);
        assert_eq!(engine.zoom_in(), 1.25);
        assert_eq!(engine.zoom_out(), 1.0);
        assert_eq!(engine.set_zoom(10.0), MAX_ZOOM);
        assert_eq!(engine.set_zoom(-3.0), MIN_ZOOM);
        assert_eq!(engine.set_zoom(f32::NAN), MIN_ZOOM);
        assert_eq!(engine.zoom_reset(), 1.0);
    }

    #[test]
    fn hit_testing_ignores_draw_direction() {
        let mut engine = engine(300, 300);
        draw_rect(&mut engine, (100.0, 100.0), (10.0, 10.0));
        assert!(engine.find_annotation_at(50.0, 50.0).is_some());
        assert!(engine.find_annotation_at(200.0, 200.0).is_none());
    }

    #[test]
    fn topmost_annotation_wins() {
        let mut engine = engine(300, 300);
        draw_rect(&mut engine, (10.0, 10.0), (100.0, 100.0));
        draw_rect(&mut engine, (20.0, 20.0), (80.0, 80.0));

        let hit = engine.find_annotation_at(50.0, 50.0).expect("hit");
        assert_eq!(hit.id, engine.annotations()[1].id);
    }

    #[test]
    fn move_tool_translates_and_commits() {
        let mut engine = engine(200, 200);
        draw_rect(&mut engine, (10.0, 10.0), (50.0, 50.0));
        let history_before = engine.state().history.len();

        engine.set_tool(Tool::Move);
        engine.pointer_down(30.0, 30.0).unwrap();
        assert!(engine.selected_annotation().is_some());
        engine.pointer_move(40.0, 45.0).unwrap();
        engine.pointer_up(50.0, 60.0).unwrap();

        let (start, end) = rect_corners(&engine, 0);
        assert_eq!(start, Point::new(30.0, 40.0));
        assert_eq!(end, Point::new(70.0, 80.0));
        assert_eq!(engine.state().history.len(), history_before + 1);
        // Selection survives the drag so deletion can follow.
        assert!(engine.selected_annotation().is_some());
    }

    #[test]
    fn delete_selected_annotation_removes_hit() {
        let mut engine = engine(200, 200);
        draw_rect(&mut engine, (10.0, 10.0), (50.0, 50.0));

        engine.set_tool(Tool::Move);
        engine.pointer_down(30.0, 30.0).unwrap();
        engine.pointer_up(30.0, 30.0).unwrap();

        engine.delete_selected_annotation().unwrap();
        assert!(engine.annotations().is_empty());
        assert!(engine.selected_annotation().is_none());

        // Without a selection this is a no-op.
        let history_before = engine.state().history.len();
        engine.delete_selected_annotation().unwrap();
        assert_eq!(engine.state().history.len(), history_before);
    }

    #[test]
    fn undo_redo_round_trip_restores_everything() {
        let mut engine = engine(400, 300);
        draw_rect(&mut engine, (10.0, 10.0), (50.0, 50.0));
        draw_rect(&mut engine, (60.0, 60.0), (100.0, 100.0));
        engine.add_text(120.0, 120.0, "note").unwrap();

        let annotations_before = engine.annotations().to_vec();

        for _ in 0..3 {
            engine.undo().unwrap();
        }
        assert!(engine.annotations().is_empty());
        assert_eq!(engine.width(), 400);
        assert_eq!(engine.height(), 300);

        for _ in 0..3 {
            engine.redo().unwrap();
        }
        assert_eq!(engine.annotations(), annotations_before.as_slice());

        // Extra undos/redos beyond the ends are no-ops.
        engine.redo().unwrap();
        assert_eq!(engine.annotations().len(), 3);
    }

    #[test]
    fn undo_restores_dimensions_and_base_after_crop() {
        let mut engine = engine(400, 300);
        engine.set_tool(Tool::Crop);
        engine.pointer_down(50.0, 50.0).unwrap();
        engine.pointer_up(200.0, 200.0).unwrap();
        assert_eq!(engine.apply_crop().unwrap(), CropOutcome::Applied);
        assert_eq!(engine.width(), 150);

        engine.undo().unwrap();
        assert_eq!(engine.width(), 400);
        assert_eq!(engine.height(), 300);

        engine.redo().unwrap();
        assert_eq!(engine.width(), 150);
        assert_eq!(engine.height(), 150);
    }

    #[test]
    fn clear_resets_history_and_store() {
        let mut engine = engine(200, 200);
        draw_rect(&mut engine, (10.0, 10.0), (50.0, 50.0));
        draw_rect(&mut engine, (60.0, 60.0), (110.0, 110.0));

        engine.clear().unwrap();
        assert!(engine.annotations().is_empty());
        assert_eq!(engine.state().history.len(), 1);

        engine.undo().unwrap();
        assert!(engine.annotations().is_empty());
    }

    #[test]
    fn pen_flow_accumulates_points() {
        let mut engine = engine(200, 200);
        engine.set_tool(Tool::Pen);
        engine.pointer_down(10.0, 10.0).unwrap();
        engine.pointer_move(20.0, 20.0).unwrap();
        engine.pointer_move(30.0, 30.0).unwrap();
        engine.pointer_up(40.0, 40.0).unwrap();

        assert_eq!(engine.annotations().len(), 1);
        match &engine.annotations()[0].kind {
            AnnotationKind::Pen { points } => {
                assert_eq!(points.len(), 3);
                assert_eq!(points[0], Point::new(10.0, 10.0));
                assert_eq!(points[2], Point::new(30.0, 30.0));
            }
            _ => panic!("expected pen annotation"),
        }

        // A click without movement is a valid one-point stroke.
        engine.pointer_down(50.0, 50.0).unwrap();
        engine.pointer_up(50.0, 50.0).unwrap();
        assert_eq!(engine.annotations().len(), 2);
    }

    #[test]
    fn state_restore_round_trip() {
        let mut engine = engine(300, 300);
        engine.set_tool(Tool::Circle);
        engine.set_color([0, 0, 255, 255]);
        engine.set_line_width(7.0);
        engine.set_zoom(1.5);
        engine.add_text(50.0, 50.0, "hello").unwrap();

        let snapshot = engine.state();

        let mut other = self::engine(300, 300);
        other.restore_state(Some(snapshot)).unwrap();
        assert_eq!(other.tool(), Tool::Circle);
        assert_eq!(other.color(), [0, 0, 255, 255]);
        assert_eq!(other.line_width(), 7.0);
        assert_eq!(other.zoom_level(), 1.5);
        assert_eq!(other.annotations(), engine.annotations());

        // Restored history remains navigable.
        other.undo().unwrap();
        assert!(other.annotations().is_empty());
    }

    #[test]
    fn restore_state_none_is_a_no_op() {
        let mut engine = engine(100, 100);
        engine.set_tool(Tool::Arrow);
        engine.restore_state(None).unwrap();
        assert_eq!(engine.tool(), Tool::Arrow);
    }

    #[test]
    fn restore_state_accepts_legacy_raster_history() {
        let mut engine = engine(100, 100);
        let snapshot = EngineSnapshot {
            history: vec![HistoryEntry::Raster(ImageData::new(png_bytes(30, 20)))],
            history_step: 0,
            ..EngineSnapshot::default()
        };

        engine.restore_state(Some(snapshot)).unwrap();
        // Raster-only entries leave dimensions and annotations untouched.
        assert_eq!(engine.width(), 100);
        assert_eq!(engine.height(), 100);
        assert!(engine.annotations().is_empty());
        assert!(!engine.can_undo());
    }

    #[test]
    fn restore_state_reseeds_empty_history() {
        let mut donor = engine(200, 200);
        donor.add_text(40.0, 40.0, "kept").unwrap();
        let mut snapshot = donor.state();
        snapshot.history = Vec::new();
        snapshot.history_step = -1;

        let mut engine = self::engine(200, 200);
        engine.restore_state(Some(snapshot)).unwrap();
        assert_eq!(engine.annotations().len(), 1);
        assert_eq!(engine.state().history.len(), 1);

        engine.undo().unwrap();
        assert_eq!(engine.annotations().len(), 1);
    }

    #[test]
    fn pan_only_moves_the_viewport() {
        let mut engine = engine(200, 200);
        draw_rect(&mut engine, (10.0, 10.0), (50.0, 50.0));
        let annotations_before = engine.annotations().to_vec();

        engine.set_tool(Tool::Pan);
        engine.pointer_down(100.0, 100.0).unwrap();
        engine.pointer_move(130.0, 80.0).unwrap();
        engine.pointer_up(130.0, 80.0).unwrap();

        assert_eq!(engine.view_offset(), (30.0, -20.0));
        assert_eq!(engine.annotations(), annotations_before.as_slice());
        assert_eq!(engine.width(), 200);
        assert_eq!(engine.zoom_level(), 1.0);
    }

    #[test]
    fn preview_never_mutates_the_store() {
        let mut engine = engine(200, 200);
        engine.set_tool(Tool::Rectangle);
        engine.pointer_down(10.0, 10.0).unwrap();
        engine.pointer_move(100.0, 100.0).unwrap();

        let frame = engine.preview().unwrap();
        assert_eq!(frame.width(), 200);
        assert!(engine.annotations().is_empty());
        assert_eq!(engine.state().history.len(), 1);
    }

    #[test]
    fn annotated_image_exports_png() {
        let mut engine = engine(120, 90);
        draw_rect(&mut engine, (10.0, 10.0), (60.0, 60.0));

        let exported = engine.annotated_image().unwrap();
        let decoded = exported.decode().unwrap();
        assert_eq!(decoded.width(), 120);
        assert_eq!(decoded.height(), 90);
    }

    #[test]
    fn malformed_raster_fails_construction() {
        assert!(Engine::new(b"not an image").is_err());
        assert!(Engine::from_base64("bm90IGFuIGltYWdl").is_err());
    }
}
