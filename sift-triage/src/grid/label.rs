//! Coordinate labels drawn into grid cells
//!
//! Fixed 5x7 bitmap font (A-Z, 0-9) rendered as scaled pixel blocks on a dark
//! plate in the cell's top-left corner.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const PLATE_COLOR: Rgb<u8> = Rgb([16, 16, 16]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 230, 0]);

/// Rows of a glyph, high bit = leftmost pixel of the 5-pixel row
fn glyph(c: char) -> Option<[u8; 7]> {
    let rows = match c.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        _ => return None,
    };
    Some(rows)
}

/// Pixel scale for labels in a cell of `cell_size_px`
///
/// Grows with the cell but the label never reaches the cell's horizontal
/// centre.
pub fn label_scale(text: &str, cell_size_px: u32) -> u32 {
    let mut scale = (cell_size_px / 48).clamp(1, 6);
    while scale > 1 && label_size(text, scale).0 > cell_size_px / 2 {
        scale -= 1;
    }
    scale
}

/// (width, height) of the plate for `text` at `scale`
pub fn label_size(text: &str, scale: u32) -> (u32, u32) {
    let chars = text.chars().count() as u32;
    let padding = scale;
    let width = (chars * (GLYPH_WIDTH + 1) * scale).saturating_sub(scale) + 2 * padding;
    let height = GLYPH_HEIGHT * scale + 2 * padding;
    (width, height)
}

/// Draw `text` on a plate with its top-left corner at (`x`, `y`)
pub fn draw_label(canvas: &mut RgbImage, text: &str, x: u32, y: u32, cell_size_px: u32) {
    if text.is_empty() {
        return;
    }

    let scale = label_scale(text, cell_size_px);
    let (width, height) = label_size(text, scale);
    let width = width.min(cell_size_px);
    let height = height.min(cell_size_px);
    draw_filled_rect_mut(
        canvas,
        Rect::at(x as i32, y as i32).of_size(width, height),
        PLATE_COLOR,
    );

    let mut pen_x = x + scale;
    let pen_y = y + scale;
    for c in text.chars() {
        if let Some(rows) = glyph(c) {
            for (row_idx, bits) in rows.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if bits & (0x10 >> col) != 0 {
                        let px = pen_x + col * scale;
                        let py = pen_y + row_idx as u32 * scale;
                        if px + scale <= x + width && py + scale <= y + height {
                            draw_filled_rect_mut(
                                canvas,
                                Rect::at(px as i32, py as i32).of_size(scale, scale),
                                TEXT_COLOR,
                            );
                        }
                    }
                }
            }
        }
        pen_x += (GLYPH_WIDTH + 1) * scale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_label_character_has_a_glyph() {
        for c in ('A'..='Z').chain('0'..='9') {
            assert!(glyph(c).is_some(), "missing glyph for {}", c);
        }
        assert!(glyph('?').is_none());
    }

    #[test]
    fn test_label_stays_left_of_centre() {
        for (text, cell) in [("T20", 96), ("AB12", 96), ("D4", 384), ("A1", 48)] {
            let scale = label_scale(text, cell);
            let (width, _) = label_size(text, scale);
            assert!(scale == 1 || width <= cell / 2, "{} in {}px", text, cell);
        }
    }

    #[test]
    fn test_draw_label_paints_plate_and_text() {
        let mut canvas = RgbImage::from_pixel(96, 96, Rgb([200, 200, 200]));
        draw_label(&mut canvas, "A1", 0, 0, 96);

        assert_eq!(*canvas.get_pixel(0, 0), PLATE_COLOR);
        let painted = canvas.pixels().filter(|p| **p == TEXT_COLOR).count();
        assert!(painted > 0);
        // Centre untouched
        assert_eq!(*canvas.get_pixel(48, 48), Rgb([200, 200, 200]));
    }
}
