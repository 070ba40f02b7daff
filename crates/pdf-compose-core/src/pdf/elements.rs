//! Content-stream operations for each element kind.
//!
//! Every element is wrapped in its own `q`/`Q` pair so transforms never leak
//! into the next element or the merged layers beneath it.

use lopdf::Object;
use lopdf::content::Operation;

use super::color::Cmyk;
use super::font::EmbeddedFont;
use super::layout::{self, LinePlacement, Matrix, TextGeometry, TextMeasure};
use crate::error::Result;
use crate::recipe::{Placement, TextElement};

fn name(resource: &str) -> Object {
    Object::Name(resource.as_bytes().to_vec())
}

/// Wrapped and positioned lines of a text element.
pub fn text_lines(element: &TextElement, font: &impl TextMeasure) -> Vec<LinePlacement> {
    let lines = layout::wrap_lines(
        &element.text,
        element.placement.width,
        element.size,
        font,
    );

    let geometry = TextGeometry {
        x: element.placement.x,
        y: element.placement.y,
        rotation: element.placement.rotation(),
        size: element.size,
        line_height: element.line_height.unwrap_or(1.0),
        align: element.align.unwrap_or_default(),
    };

    layout::place_lines(lines, geometry, font)
}

/// One `q cm BT Tf k Tj ET Q` block per line, in DeviceCMYK.
pub fn text(element: &TextElement, font: &EmbeddedFont, font_resource: &str) -> Result<Vec<Operation>> {
    let color = Cmyk::parse(&element.color)?;
    let lines = text_lines(element, font);

    let mut ops = Vec::with_capacity(lines.len() * 8);
    for line in lines {
        ops.push(Operation::new("q", vec![]));
        ops.push(line.matrix.to_operation());
        ops.push(Operation::new("BT", vec![]));
        ops.push(Operation::new(
            "Tf",
            vec![name(font_resource), element.size.into()],
        ));
        ops.push(color.fill_operation());
        ops.push(Operation::new("Tj", vec![font.encode(&line.text)]));
        ops.push(Operation::new("ET", vec![]));
        ops.push(Operation::new("Q", vec![]));
    }
    Ok(ops)
}

/// Draw an image XObject of `width x height` pixels, scaled to fit the
/// placement bounds and rotated about `(x, y)`.
pub fn image(placement: &Placement, resource: &str, width: u32, height: u32) -> Vec<Operation> {
    let (width, height) = (width as f32, height as f32);
    let scale = layout::fit_scale(placement.width, placement.height, width, height);

    vec![
        Operation::new("q", vec![]),
        Matrix::rotation_at(placement.rotation(), placement.x, placement.y).to_operation(),
        // Image space is the unit square
        Matrix::scale_xy(width * scale, height * scale).to_operation(),
        Operation::new("Do", vec![name(resource)]),
        Operation::new("Q", vec![]),
    ]
}

/// Draw an imported fragment page: rotate, scale to fit, then move the
/// fragment's media box origin to `(0, 0)`.
pub fn fragment(placement: &Placement, resource: &str, media_box: [f32; 4]) -> Vec<Operation> {
    let [x0, y0, x1, y1] = media_box;
    let scale = layout::fit_scale(placement.width, placement.height, x1 - x0, y1 - y0);

    vec![
        Operation::new("q", vec![]),
        Matrix::rotation_at(placement.rotation(), placement.x, placement.y).to_operation(),
        Matrix::scale(scale).to_operation(),
        Matrix::translate(-x0, -y0).to_operation(),
        Operation::new("Do", vec![name(resource)]),
        Operation::new("Q", vec![]),
    ]
}

/// Draw a merged layer page at its original position.
pub fn layer(resource: &str) -> Vec<Operation> {
    vec![
        Operation::new("q", vec![]),
        Operation::new("Do", vec![name(resource)]),
        Operation::new("Q", vec![]),
    ]
}
