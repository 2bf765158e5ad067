//! Bounding-box overlay for the live view.

use anyhow::Result;
use image::{Rgb, RgbImage};

use crate::detect::{BoundingBox, Detection};
use crate::frame::Frame;

const BOX_THICKNESS: u32 = 2;

/// Fixed colour per known part; anything else is drawn white.
const PALETTE: [(&str, [u8; 3]); 9] = [
    ("Accessories Set", [255, 0, 0]),
    ("Barcode", [0, 255, 0]),
    ("Silica", [0, 0, 255]),
    ("Strap", [255, 165, 0]),
    ("Lower", [128, 0, 128]),
    ("Mouthpiece", [255, 255, 0]),
    ("Barrel", [0, 255, 255]),
    ("Bell", [255, 0, 255]),
    ("Upper", [75, 0, 130]),
];

const DEFAULT_COLOUR: [u8; 3] = [255, 255, 255];

pub fn colour_for(name: &str) -> Rgb<u8> {
    let rgb = PALETTE
        .iter()
        .find(|(known, _)| *known == name)
        .map_or(DEFAULT_COLOUR, |(_, rgb)| *rgb);
    Rgb(rgb)
}

/// Copy of `frame` with a rectangle around every detection.
pub fn draw_detections(frame: &Frame, detections: &[Detection]) -> Result<RgbImage> {
    let mut image = frame.to_image()?;
    for det in detections {
        draw_box(&mut image, det.bbox, colour_for(&det.name));
    }
    Ok(image)
}

fn draw_box(image: &mut RgbImage, bbox: BoundingBox, colour: Rgb<u8>) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let bbox = bbox.clamp_to(w, h);
    if bbox.width() == 0 || bbox.height() == 0 {
        return;
    }
    let (x1, y1) = (bbox.x1 as u32, bbox.y1 as u32);
    let x2 = (bbox.x2 as u32).min(w - 1);
    let y2 = (bbox.y2 as u32).min(h - 1);
    for t in 0..BOX_THICKNESS {
        for x in x1..=x2 {
            put(image, x, y1.saturating_add(t), colour);
            put(image, x, y2.saturating_sub(t), colour);
        }
        for y in y1..=y2 {
            put(image, x1.saturating_add(t), y, colour);
            put(image, x2.saturating_sub(t), y, colour);
        }
    }
}

fn put(image: &mut RgbImage, x: u32, y: u32, colour: Rgb<u8>) {
    if x < image.width() && y < image.height() {
        image.put_pixel(x, y, colour);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(name: &str, bbox: BoundingBox) -> Detection {
        Detection {
            name: name.to_string(),
            confidence: 0.9,
            area: bbox.area(),
            bbox,
        }
    }

    #[test]
    fn palette_and_default() {
        assert_eq!(colour_for("Bell"), Rgb([255, 0, 255]));
        assert_eq!(colour_for("Upper"), Rgb([75, 0, 130]));
        assert_eq!(colour_for("Gizmo"), Rgb([255, 255, 255]));
    }

    #[test]
    fn draws_outline_only() -> Result<()> {
        let frame = Frame::from_rgb(vec![0u8; 40 * 30 * 3], 40, 30, 1)?;
        let out = draw_detections(&frame, &[det("Silica", BoundingBox::new(5, 5, 25, 20))])?;
        assert_eq!(*out.get_pixel(5, 5), Rgb([0, 0, 255]));
        assert_eq!(*out.get_pixel(6, 12), Rgb([0, 0, 255]));
        assert_eq!(*out.get_pixel(15, 12), Rgb([0, 0, 0]));
        // Source frame is untouched.
        assert_eq!(&frame.pixels()[..3], &[0, 0, 0]);
        Ok(())
    }

    #[test]
    fn boxes_outside_the_frame_are_clamped() -> Result<()> {
        let frame = Frame::from_rgb(vec![0u8; 10 * 10 * 3], 10, 10, 1)?;
        let out = draw_detections(&frame, &[det("Bell", BoundingBox::new(-5, -5, 50, 50))])?;
        assert_eq!(*out.get_pixel(0, 0), Rgb([255, 0, 255]));
        assert_eq!(*out.get_pixel(9, 9), Rgb([255, 0, 255]));
        Ok(())
    }
}
