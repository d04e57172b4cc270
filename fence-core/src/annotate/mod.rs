//! Per-frame visual markup and alert counting.
//!
//! For each frame the annotator draws the fence outline, a box + label for
//! every detection, and a thicker alert overlay for person detections inside
//! the fence.  The alert overlay is drawn after (and over) the general box;
//! its label sits higher so both texts stay legible.  The return value is the
//! number of alerts this frame contributed.

use ab_glyph::{FontArc, PxScale};
use image::{ImageBuffer, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::detection::{class_name, Detection};
use crate::geometry::FencePolygon;
use crate::video::RgbFrame;

// Colour scheme mirrors the usual demo convention: green fence, blue boxes,
// white labels, red alerts.
const FENCE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const ALERT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

const FENCE_THICKNESS: u32 = 2;
const BOX_THICKNESS: u32 = 2;
const ALERT_THICKNESS: u32 = 3;

const LABEL_SCALE: f32 = 14.0;
const ALERT_SCALE: f32 = 20.0;
/// Vertical offsets of the two labels above a box's top edge.
const LABEL_OFFSET: i32 = 16;
const ALERT_LABEL_OFFSET: i32 = 40;

/// Draws fence, boxes, labels and alert overlays onto frames in place.
/// The fence polygon is fixed at construction and never mutated.
pub struct Annotator {
    fence: FencePolygon,
    font: Option<FontArc>,
}

impl Annotator {
    /// `font` is used for label text; without one the boxes, fence and alert
    /// overlays are still drawn and alert counting is unaffected.
    pub fn new(fence: FencePolygon, font: Option<FontArc>) -> Self {
        Self { fence, font }
    }

    pub fn fence(&self) -> &FencePolygon {
        &self.fence
    }

    /// Annotate one frame in place and return the number of trespass alerts
    /// it raised.  A frame whose buffer does not match its dimensions is
    /// malformed input and fails loudly; there is no recovery path.
    pub fn annotate(&self, frame: &mut RgbFrame, detections: &[Detection]) -> u64 {
        let mut img: RgbImage =
            ImageBuffer::from_raw(frame.width, frame.height, std::mem::take(&mut frame.data))
                .expect("frame buffer matches dimensions");

        // The fence outline goes on every frame, detections or not.
        self.draw_fence(&mut img);

        let mut alerts = 0u64;
        for det in detections {
            let x1 = det.bbox.x1.round() as i32;
            let y1 = det.bbox.y1.round() as i32;
            let x2 = det.bbox.x2.round() as i32;
            let y2 = det.bbox.y2.round() as i32;

            // General box + label first, for every class.
            draw_thick_hollow_rect(&mut img, x1, y1, x2, y2, BOX_COLOR, BOX_THICKNESS);
            let label = format!("{} {:.2}", class_name(det.class_id), det.confidence);
            self.draw_label(&mut img, &label, x1, y1 - LABEL_OFFSET, LABEL_SCALE, LABEL_COLOR);

            // Alert overlay on top for trespassing persons.  The red box is
            // one ring larger, fully covering the blue one.
            if det.is_person() && self.fence.is_trespassing(&det.bbox) {
                draw_thick_hollow_rect(&mut img, x1, y1, x2, y2, ALERT_COLOR, ALERT_THICKNESS);
                self.draw_label(
                    &mut img,
                    "ALERT: Trespassing!",
                    x1,
                    y1 - ALERT_LABEL_OFFSET,
                    ALERT_SCALE,
                    ALERT_COLOR,
                );
                alerts += 1;
            }
        }

        frame.data = img.into_raw();
        alerts
    }

    fn draw_fence(&self, img: &mut RgbImage) {
        let points = self.fence.points();
        for i in 0..points.len() {
            let (x1, y1) = points[i];
            let (x2, y2) = points[(i + 1) % points.len()];
            draw_thick_line(
                img,
                (x1 as f32, y1 as f32),
                (x2 as f32, y2 as f32),
                FENCE_COLOR,
                FENCE_THICKNESS,
            );
        }
    }

    fn draw_label(
        &self,
        img: &mut RgbImage,
        text: &str,
        x: i32,
        y: i32,
        scale: f32,
        color: Rgb<u8>,
    ) {
        if let Some(font) = &self.font {
            draw_text_mut(img, color, x, y, PxScale::from(scale), font, text);
        }
    }
}

/// Hollow rectangle with the given stroke width, growing outward from the
/// exact box coordinates so a thicker overlay covers a thinner one.
fn draw_thick_hollow_rect(
    img: &mut RgbImage,
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
    color: Rgb<u8>,
    thickness: u32,
) {
    let w = (x2 - x1).max(1) as u32;
    let h = (y2 - y1).max(1) as u32;
    for t in 0..thickness as i32 {
        let rect = Rect::at(x1 - t, y1 - t).of_size(w + 2 * t as u32, h + 2 * t as u32);
        draw_hollow_rect_mut(img, rect, color);
    }
}

/// Line segment with the given stroke width, approximated by parallel 1 px
/// segments offset perpendicular to the dominant axis.
fn draw_thick_line(
    img: &mut RgbImage,
    start: (f32, f32),
    end: (f32, f32),
    color: Rgb<u8>,
    thickness: u32,
) {
    let horizontal_ish = (end.0 - start.0).abs() >= (end.1 - start.1).abs();
    for t in 0..thickness as i32 {
        let o = t as f32;
        if horizontal_ish {
            draw_line_segment_mut(img, (start.0, start.1 + o), (end.0, end.1 + o), color);
        } else {
            draw_line_segment_mut(img, (start.0 + o, start.1), (end.0 + o, end.1), color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BBox;

    const W: u32 = 320;
    const H: u32 = 240;

    fn square_fence() -> FencePolygon {
        FencePolygon::new(vec![(50, 50), (150, 50), (150, 150), (50, 150)]).unwrap()
    }

    fn annotator() -> Annotator {
        Annotator::new(square_fence(), None)
    }

    fn frame() -> RgbFrame {
        RgbFrame {
            data: vec![0u8; (W * H * 3) as usize],
            width: W,
            height: H,
            pts: 0,
        }
    }

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, class_id: usize) -> Detection {
        Detection {
            bbox: BBox { x1, y1, x2, y2 },
            class_id,
            confidence: 0.9,
        }
    }

    fn px(frame: &RgbFrame, x: u32, y: u32) -> [u8; 3] {
        let idx = ((y * frame.width + x) * 3) as usize;
        [frame.data[idx], frame.data[idx + 1], frame.data[idx + 2]]
    }

    #[test]
    fn fence_is_drawn_even_without_detections() {
        let mut f = frame();
        let alerts = annotator().annotate(&mut f, &[]);
        assert_eq!(alerts, 0);
        // Midpoint of the fence's top edge is green.
        assert_eq!(px(&f, 100, 50), [0, 255, 0]);
    }

    #[test]
    fn person_inside_fence_raises_one_alert_and_red_box() {
        let mut f = frame();
        let alerts = annotator().annotate(&mut f, &[det(80.0, 80.0, 120.0, 120.0, 0)]);
        assert_eq!(alerts, 1);
        // The alert overlay covers the general box at its exact corner.
        assert_eq!(px(&f, 80, 80), [255, 0, 0]);
    }

    #[test]
    fn person_outside_fence_keeps_blue_box_and_no_alert() {
        let mut f = frame();
        let alerts = annotator().annotate(&mut f, &[det(200.0, 180.0, 240.0, 220.0, 0)]);
        assert_eq!(alerts, 0);
        assert_eq!(px(&f, 200, 180), [0, 0, 255]);
    }

    #[test]
    fn non_person_inside_fence_is_not_an_alert() {
        let mut f = frame();
        // Class 16 is "dog": drawn, never alerted.
        let alerts = annotator().annotate(&mut f, &[det(80.0, 80.0, 120.0, 120.0, 16)]);
        assert_eq!(alerts, 0);
        assert_eq!(px(&f, 80, 80), [0, 0, 255]);
    }

    #[test]
    fn each_trespassing_person_counts_separately() {
        let mut f = frame();
        let dets = [
            det(60.0, 60.0, 90.0, 90.0, 0),
            det(100.0, 100.0, 140.0, 140.0, 0),
            det(200.0, 180.0, 240.0, 220.0, 0), // outside
        ];
        assert_eq!(annotator().annotate(&mut f, &dets), 2);
    }

    #[test]
    fn frame_dimensions_are_preserved() {
        let mut f = frame();
        annotator().annotate(&mut f, &[det(80.0, 80.0, 120.0, 120.0, 0)]);
        assert_eq!(f.width, W);
        assert_eq!(f.height, H);
        assert_eq!(f.data.len(), (W * H * 3) as usize);
    }
}
