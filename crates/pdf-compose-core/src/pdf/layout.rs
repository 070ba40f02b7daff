//! Text layout and placement geometry.
//!
//! # Coordinate System
//!
//! Recipe coordinates are PDF user space: origin at the bottom-left of the
//! page, y increasing upward. Rotation is given in degrees, clockwise-positive,
//! and converted to the counter-clockwise radians PDF matrices expect:
//! ```text
//! rad = -degrees * PI / 180
//! ```
//! Every drawable is positioned with a single `cm` whose matrix is
//! `[cos(rad) sin(rad) -sin(rad) cos(rad) x y]`.

use lopdf::content::Operation;

use crate::recipe::TextAlign;

/// Measures rendered text width in points.
pub trait TextMeasure {
    fn measure(&self, text: &str, size: f32) -> f32;
}

/// A 2D affine transform in PDF `cm` operand order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix(pub [f32; 6]);

impl Matrix {
    pub const IDENTITY: Self = Self([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    /// Rotate by `degrees` (clockwise-positive) about the origin, then move to `(x, y)`.
    pub fn rotation_at(degrees: f32, x: f32, y: f32) -> Self {
        let rad = to_radians(degrees);
        let (sin, cos) = rad.sin_cos();
        Self([cos, sin, -sin, cos, x, y])
    }

    pub const fn scale(factor: f32) -> Self {
        Self([factor, 0.0, 0.0, factor, 0.0, 0.0])
    }

    pub const fn scale_xy(sx: f32, sy: f32) -> Self {
        Self([sx, 0.0, 0.0, sy, 0.0, 0.0])
    }

    pub const fn translate(x: f32, y: f32) -> Self {
        Self([1.0, 0.0, 0.0, 1.0, x, y])
    }

    pub fn to_operation(self) -> Operation {
        Operation::new("cm", self.0.iter().map(|&v| v.into()).collect())
    }
}

/// Clockwise degrees to the counter-clockwise radians used in PDF matrices.
pub fn to_radians(degrees: f32) -> f32 {
    -degrees * std::f32::consts::PI / 180.0
}

/// Break `text` into visual lines.
///
/// Explicit `\n` always starts a new line. A line wider than `width` is
/// wrapped greedily on single spaces; a word that is wider than `width` on
/// its own is kept whole on a line of its own.
pub fn wrap_lines(text: &str, width: Option<f32>, size: f32, font: &impl TextMeasure) -> Vec<String> {
    let mut lines = Vec::new();

    for raw in text.split('\n') {
        match width {
            Some(max) if font.measure(raw, size) > max => {
                wrap_words(raw, max, size, font, &mut lines);
            }
            _ => lines.push(raw.to_string()),
        }
    }

    lines
}

fn wrap_words(line: &str, max: f32, size: f32, font: &impl TextMeasure, out: &mut Vec<String>) {
    let space = font.measure(" ", size);
    let mut current = String::new();
    let mut current_width = 0.0;
    let mut started = false;

    for word in line.split(' ') {
        let word_width = font.measure(word, size);

        if !started {
            current.push_str(word);
            current_width = word_width;
            started = true;
            continue;
        }

        let candidate = current_width + space + word_width;
        if candidate > max {
            out.push(std::mem::take(&mut current));
            current.push_str(word);
            current_width = word_width;
        } else {
            current.push(' ');
            current.push_str(word);
            current_width = candidate;
        }
    }

    if started {
        out.push(current);
    }
}

/// Horizontal offset of the line origin for an alignment.
pub fn anchor(align: TextAlign, line_width: f32) -> f32 {
    match align {
        TextAlign::Left => 0.0,
        TextAlign::Center => line_width / 2.0,
        TextAlign::Right => line_width,
    }
}

/// A wrapped line with the transform that places it on the page.
#[derive(Debug, Clone, PartialEq)]
pub struct LinePlacement {
    pub text: String,
    pub matrix: Matrix,
}

/// Parameters shared by every line of one text element.
#[derive(Debug, Clone, Copy)]
pub struct TextGeometry {
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub size: f32,
    pub line_height: f32,
    pub align: TextAlign,
}

/// Position each line: lines step down by `line_height * size` along the
/// rotated vertical axis and shift back along the rotated baseline by their
/// alignment anchor.
pub fn place_lines(lines: Vec<String>, geometry: TextGeometry, font: &impl TextMeasure) -> Vec<LinePlacement> {
    let rad = to_radians(geometry.rotation);
    let (sin, cos) = rad.sin_cos();

    lines
        .into_iter()
        .enumerate()
        .map(|(index, text)| {
            let vertical = index as f32 * geometry.line_height * geometry.size;
            let horizontal = anchor(geometry.align, font.measure(&text, geometry.size));

            let x = geometry.x + sin * vertical - cos * horizontal;
            let y = geometry.y - cos * vertical - sin * horizontal;

            LinePlacement {
                text,
                matrix: Matrix([cos, sin, -sin, cos, x, y]),
            }
        })
        .collect()
}

/// Uniform scale that fits `content_width x content_height` inside the
/// bounds that are set; 1 when neither is.
pub fn fit_scale(width: Option<f32>, height: Option<f32>, content_width: f32, content_height: f32) -> f32 {
    let horizontal = width.filter(|_| content_width > 0.0).map(|w| w / content_width);
    let vertical = height.filter(|_| content_height > 0.0).map(|h| h / content_height);

    match (horizontal, vertical) {
        (Some(h), Some(v)) => h.min(v),
        (Some(s), None) | (None, Some(s)) => s,
        (None, None) => 1.0,
    }
}
