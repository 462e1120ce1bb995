use serde::{Deserialize, Serialize};

pub type AnnotationId = u64;

/// Minimum pick radius for line-like annotations, in logical pixels.
pub const HIT_TOLERANCE: f32 = 5.0;

const TEXT_WIDTH_FACTOR: f32 = 0.6;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f32, dy: f32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    pub fn distance(self, other: Point) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Parses `#rrggbb` or `#rrggbbaa` (leading `#` optional) into RGBA bytes.
pub fn parse_hex_color(value: &str) -> Option<[u8; 4]> {
    let hex = value.strip_prefix('#').unwrap_or(value);
    if hex.len() != 6 && hex.len() != 8 {
        return None;
    }
    let byte = |range: std::ops::Range<usize>| u8::from_str_radix(hex.get(range)?, 16).ok();
    let r = byte(0..2)?;
    let g = byte(2..4)?;
    let b = byte(4..6)?;
    let a = if hex.len() == 8 { byte(6..8)? } else { 255 };
    Some([r, g, b, a])
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub id: AnnotationId,
    #[serde(flatten)]
    pub kind: AnnotationKind,
    pub color: [u8; 4],
    pub line_width: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum AnnotationKind {
    Pen {
        points: Vec<Point>,
    },
    Rectangle {
        start: Point,
        end: Point,
    },
    Circle {
        start: Point,
        end: Point,
    },
    Arrow {
        start: Point,
        end: Point,
    },
    Blackout {
        start: Point,
        end: Point,
    },
    Text {
        pos: Point,
        content: String,
        font_size: f32,
    },
}

impl Annotation {
    pub fn label(&self) -> &'static str {
        match self.kind {
            AnnotationKind::Pen { .. } => "pen",
            AnnotationKind::Rectangle { .. } => "rectangle",
            AnnotationKind::Circle { .. } => "circle",
            AnnotationKind::Arrow { .. } => "arrow",
            AnnotationKind::Blackout { .. } => "blackout",
            AnnotationKind::Text { .. } => "text",
        }
    }

    /// Axis-aligned bounding box, `None` for a pen stroke with no points.
    pub fn bounds(&self) -> Option<(Point, Point)> {
        match &self.kind {
            AnnotationKind::Pen { points } => {
                let first = points.first()?;
                let mut min = *first;
                let mut max = *first;
                for p in points {
                    min.x = min.x.min(p.x);
                    min.y = min.y.min(p.y);
                    max.x = max.x.max(p.x);
                    max.y = max.y.max(p.y);
                }
                Some((min, max))
            }
            AnnotationKind::Rectangle { start, end }
            | AnnotationKind::Arrow { start, end }
            | AnnotationKind::Blackout { start, end } => Some(corner_box(*start, *end)),
            AnnotationKind::Circle { start, end } => {
                let radius = start.distance(*end);
                Some((
                    Point::new(start.x - radius, start.y - radius),
                    Point::new(start.x + radius, start.y + radius),
                ))
            }
            AnnotationKind::Text {
                pos,
                content,
                font_size,
            } => {
                let width = estimated_text_width(content, *font_size);
                Some((
                    Point::new(pos.x, pos.y - font_size),
                    Point::new(pos.x + width, pos.y),
                ))
            }
        }
    }

    /// Geometric hit test in logical coordinates.
    pub fn contains(&self, point: Point) -> bool {
        let tolerance = self.line_width.max(HIT_TOLERANCE);
        match &self.kind {
            AnnotationKind::Pen { points } => match points.as_slice() {
                [] => false,
                [only] => only.distance(point) <= tolerance,
                _ => points
                    .windows(2)
                    .any(|seg| distance_to_segment(point, seg[0], seg[1]) <= tolerance),
            },
            AnnotationKind::Rectangle { start, end } | AnnotationKind::Blackout { start, end } => {
                let (min, max) = corner_box(*start, *end);
                point.x >= min.x && point.x <= max.x && point.y >= min.y && point.y <= max.y
            }
            AnnotationKind::Circle { start, end } => start.distance(point) <= start.distance(*end),
            AnnotationKind::Arrow { start, end } => {
                distance_to_segment(point, *start, *end) <= tolerance
            }
            AnnotationKind::Text {
                pos,
                content,
                font_size,
            } => {
                let width = estimated_text_width(content, *font_size);
                point.x >= pos.x
                    && point.x <= pos.x + width
                    && point.y >= pos.y - font_size
                    && point.y <= pos.y
            }
        }
    }

    pub fn translate(&mut self, dx: f32, dy: f32) {
        match &mut self.kind {
            AnnotationKind::Pen { points } => {
                for p in points.iter_mut() {
                    *p = p.offset(dx, dy);
                }
            }
            AnnotationKind::Rectangle { start, end }
            | AnnotationKind::Circle { start, end }
            | AnnotationKind::Arrow { start, end }
            | AnnotationKind::Blackout { start, end } => {
                *start = start.offset(dx, dy);
                *end = end.offset(dx, dy);
            }
            AnnotationKind::Text { pos, .. } => *pos = pos.offset(dx, dy),
        }
    }

    /// Remaps this annotation into the coordinate space of a cropped canvas.
    ///
    /// Pure: the receiver is untouched. Returns `None` when the translated
    /// geometry lies fully outside the new bounds and the annotation should
    /// be dropped from the store.
    pub fn adjust_for_crop(
        &self,
        offset_x: f32,
        offset_y: f32,
        new_width: f32,
        new_height: f32,
    ) -> Option<Annotation> {
        let mut adjusted = self.clone();
        adjusted.translate(-offset_x, -offset_y);
        let (min, max) = adjusted.bounds()?;
        if max.x < 0.0 || max.y < 0.0 || min.x > new_width || min.y > new_height {
            return None;
        }
        Some(adjusted)
    }
}

fn corner_box(a: Point, b: Point) -> (Point, Point) {
    (
        Point::new(a.x.min(b.x), a.y.min(b.y)),
        Point::new(a.x.max(b.x), a.y.max(b.y)),
    )
}

pub fn estimated_text_width(content: &str, font_size: f32) -> f32 {
    // Conservative estimate; exact metrics would need font shaping.
    content.chars().count().max(1) as f32 * font_size * TEXT_WIDTH_FACTOR
}

pub fn distance_to_segment(point: Point, a: Point, b: Point) -> f32 {
    let abx = b.x - a.x;
    let aby = b.y - a.y;
    let apx = point.x - a.x;
    let apy = point.y - a.y;
    let len_sq = abx * abx + aby * aby;
    if len_sq <= f32::EPSILON {
        return a.distance(point);
    }
    let t = ((apx * abx + apy * aby) / len_sq).clamp(0.0, 1.0);
    let projection = Point::new(a.x + abx * t, a.y + aby * t);
    projection.distance(point)
}
