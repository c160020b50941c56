//! Redaction: opaque black fill over every detected region.
//!
//! Boxes go through [`BBox::clamp_to`] first; inverted, degenerate and
//! off-page boxes are dropped, partially-outside boxes are cut to the page.
//! Overlapping boxes simply paint the same pixels twice.

use crate::document::{Detection, Page};
use image::{DynamicImage, Rgba};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use tracing::{debug, warn};

const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Return a redacted copy of `page`. Dimensions and colour type are unchanged.
pub fn apply(page: &Page, detections: &[Detection]) -> Page {
    let mut out = page.clone();
    apply_in_place(&mut out.image, detections);
    out
}

/// Fill every valid detection on `image`. Returns how many boxes were drawn.
pub fn apply_in_place(image: &mut DynamicImage, detections: &[Detection]) -> usize {
    let (width, height) = (image.width(), image.height());
    let mut drawn = 0;
    for det in detections {
        let Some(rect) = det.bbox.clamp_to(width, height) else {
            warn!(
                "Dropping box {:?} ({}) outside or degenerate on {}x{} page",
                det.bbox, det.label, width, height
            );
            continue;
        };
        let r = Rect::at(rect.x as i32, rect.y as i32).of_size(rect.width, rect.height);
        draw_filled_rect_mut(image, r, BLACK);
        drawn += 1;
    }
    debug!("Filled {} of {} boxes", drawn, detections.len());
    drawn
}
