use ab_glyph::FontArc;
use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use imageproc::drawing::draw_text_mut;
use tiny_skia::{
    FillRule, LineCap, LineJoin, Paint, PathBuilder, Pixmap, Rect, Stroke, Transform,
};

use crate::annotation::{Annotation, AnnotationKind, Point};

const ARROW_HEAD_LENGTH: f32 = 15.0;
const ARROW_HEAD_WIDTH: f32 = 8.0;

/// Composites the annotation store over the base image.
pub fn flatten(image: &DynamicImage, annotations: &[Annotation]) -> Result<DynamicImage> {
    let mut pixmap = Pixmap::new(image.width(), image.height())
        .ok_or_else(|| anyhow!("cannot allocate pixmap"))?;

    copy_image_to_pixmap(image, &mut pixmap)?;

    for annotation in annotations {
        draw_annotation_shape(&mut pixmap, annotation);
    }

    let mut output = RgbaImage::from_raw(image.width(), image.height(), pixmap.data().to_vec())
        .ok_or_else(|| anyhow!("cannot construct output image"))?;

    draw_text_annotations(&mut output, annotations);

    Ok(DynamicImage::ImageRgba8(output))
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .context("cannot encode PNG")?;
    Ok(buffer.into_inner())
}

fn copy_image_to_pixmap(image: &DynamicImage, pixmap: &mut Pixmap) -> Result<()> {
    let rgba = image.to_rgba8();
    let data = pixmap.data_mut();
    if data.len() != rgba.len() {
        return Err(anyhow!("source image and pixmap size mismatch"));
    }
    data.copy_from_slice(rgba.as_raw());
    Ok(())
}

fn draw_annotation_shape(pixmap: &mut Pixmap, annotation: &Annotation) {
    let mut paint = Paint::default();
    paint.set_color_rgba8(
        annotation.color[0],
        annotation.color[1],
        annotation.color[2],
        annotation.color[3],
    );
    paint.anti_alias = true;

    let stroke = Stroke {
        width: annotation.line_width.max(0.5),
        line_cap: LineCap::Round,
        line_join: LineJoin::Round,
        ..Stroke::default()
    };

    match &annotation.kind {
        AnnotationKind::Pen { points } => match points.as_slice() {
            [] => {}
            [only] => fill_dot(pixmap, *only, stroke.width * 0.5, &paint),
            points => {
                let mut pb = PathBuilder::new();
                pb.move_to(points[0].x, points[0].y);
                for p in &points[1..] {
                    pb.line_to(p.x, p.y);
                }
                if let Some(path) = pb.finish() {
                    pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
                }
            }
        },
        AnnotationKind::Rectangle { start, end } => {
            if let Some(rect) = corner_rect(*start, *end) {
                let path = PathBuilder::from_rect(rect);
                pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
            }
        }
        AnnotationKind::Circle { start, end } => {
            let radius = start.distance(*end);
            if radius >= 0.5 {
                let mut pb = PathBuilder::new();
                pb.push_circle(start.x, start.y, radius);
                if let Some(path) = pb.finish() {
                    pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
                }
            }
        }
        AnnotationKind::Arrow { start, end } => {
            let mut pb = PathBuilder::new();
            pb.move_to(start.x, start.y);
            pb.line_to(end.x, end.y);
            if let Some(path) = pb.finish() {
                pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
            }
            fill_arrow_head(pixmap, *start, *end, &paint);
        }
        AnnotationKind::Blackout { start, end } => {
            // Redaction is always opaque black regardless of the pen color.
            let mut black = Paint::default();
            black.set_color_rgba8(0, 0, 0, 255);
            if let Some(rect) = corner_rect(*start, *end) {
                let path = PathBuilder::from_rect(rect);
                pixmap.fill_path(&path, &black, FillRule::Winding, Transform::identity(), None);
            }
        }
        AnnotationKind::Text { .. } => {
            // Text is rendered in a separate pass via imageproc.
        }
    }
}

fn corner_rect(a: Point, b: Point) -> Option<Rect> {
    Rect::from_ltrb(
        a.x.min(b.x),
        a.y.min(b.y),
        a.x.max(b.x),
        a.y.max(b.y),
    )
}

fn fill_dot(pixmap: &mut Pixmap, center: Point, radius: f32, paint: &Paint) {
    let mut pb = PathBuilder::new();
    pb.push_circle(center.x, center.y, radius.max(0.5));
    if let Some(path) = pb.finish() {
        pixmap.fill_path(&path, paint, FillRule::Winding, Transform::identity(), None);
    }
}

fn fill_arrow_head(pixmap: &mut Pixmap, from: Point, to: Point, paint: &Paint) {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    let length = (dx * dx + dy * dy).sqrt().max(1.0);
    let ux = dx / length;
    let uy = dy / length;

    let base_x = to.x - ux * ARROW_HEAD_LENGTH;
    let base_y = to.y - uy * ARROW_HEAD_LENGTH;
    let left_x = base_x - uy * ARROW_HEAD_WIDTH;
    let left_y = base_y + ux * ARROW_HEAD_WIDTH;
    let right_x = base_x + uy * ARROW_HEAD_WIDTH;
    let right_y = base_y - ux * ARROW_HEAD_WIDTH;

    let mut pb = PathBuilder::new();
    pb.move_to(to.x, to.y);
    pb.line_to(left_x, left_y);
    pb.line_to(right_x, right_y);
    pb.close();
    if let Some(path) = pb.finish() {
        pixmap.fill_path(&path, paint, FillRule::Winding, Transform::identity(), None);
    }
}

fn draw_text_annotations(image: &mut RgbaImage, annotations: &[Annotation]) {
    let Some(font) = load_system_font() else {
        return;
    };

    for annotation in annotations {
        if let AnnotationKind::Text {
            pos,
            content,
            font_size,
        } = &annotation.kind
        {
            // pos is the baseline anchor; imageproc anchors at the top.
            draw_text_mut(
                image,
                Rgba(annotation.color),
                pos.x as i32,
                (pos.y - font_size) as i32,
                *font_size,
                &font,
                content,
            );
        }
    }
}

fn load_system_font() -> Option<FontArc> {
    let candidates = [
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
        "/usr/share/fonts/TTF/DejaVuSans.ttf",
        "/System/Library/Fonts/Supplemental/Arial Unicode.ttf",
        "/System/Library/Fonts/Supplemental/Arial.ttf",
        "/System/Library/Fonts/Supplemental/Helvetica.ttf",
        "C:\\Windows\\Fonts\\arial.ttf",
    ];

    for path in candidates {
        if let Ok(bytes) = std::fs::read(path) {
            if let Ok(font) = FontArc::try_from_vec(bytes) {
                return Some(font);
            }
        }
    }

    None
}
