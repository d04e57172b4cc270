//! Decode, detect and annotate one whole video.
//!
//! Strictly sequential: one detector call and one annotator call per decoded
//! frame, frames collected in decode order together with the running alert
//! total.  The entire annotated video is held in memory before it is
//! written, fine for short clips and a known limit for anything longer.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{error, info};

use crate::annotate::Annotator;
use crate::detection::ObjectDetector;
use crate::video::{RgbFrame, VideoReader};

/// Anything that yields frames in decode order until exhaustion.  The video
/// reader is the production source; tests substitute synthetic frames.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<RgbFrame>>;
}

impl FrameSource for VideoReader {
    fn next_frame(&mut self) -> Result<Option<RgbFrame>> {
        VideoReader::next_frame(self)
    }
}

/// The result of one full processing run: annotated frames in decode order
/// plus the total number of trespass alerts.
pub struct ProcessedVideo {
    pub frames: Vec<RgbFrame>,
    pub alerts: u64,
}

pub struct Pipeline<D> {
    detector: D,
    annotator: Annotator,
    prof_frames: u64,
    prof_detect: Duration,
    prof_annotate: Duration,
}

impl<D: ObjectDetector> Pipeline<D> {
    pub fn new(detector: D, annotator: Annotator) -> Self {
        Self {
            detector,
            annotator,
            prof_frames: 0,
            prof_detect: Duration::ZERO,
            prof_annotate: Duration::ZERO,
        }
    }

    /// Process the video at `path`.  An unreadable input is a recoverable
    /// failure: it is logged and reported as `Ok(None)` with zero results.
    /// Errors after a successful open (decode or inference failures) are
    /// fatal and propagate.
    pub fn process_video<P: AsRef<Path>>(&mut self, path: P) -> Result<Option<ProcessedVideo>> {
        let reader = match VideoReader::open(&path) {
            Ok(reader) => reader,
            Err(e) => {
                error!(path = %path.as_ref().display(), "cannot open video: {e:#}");
                return Ok(None);
            }
        };
        self.process_frames(reader).map(Some)
    }

    pub fn process_frames(&mut self, source: impl FrameSource) -> Result<ProcessedVideo> {
        self.process_frames_with_progress(source, |_| {})
    }

    /// Same as [`Pipeline::process_frames`] but calls `progress(frames_done)`
    /// after every frame, enabling progress reporting to a UI.
    pub fn process_frames_with_progress(
        &mut self,
        mut source: impl FrameSource,
        mut progress: impl FnMut(u64),
    ) -> Result<ProcessedVideo> {
        let mut frames = Vec::new();
        let mut alerts = 0u64;

        while let Some(mut frame) = source.next_frame()? {
            let detect_start = Instant::now();
            let detections = self.detector.detect(&frame)?;
            self.prof_detect += detect_start.elapsed();

            let annotate_start = Instant::now();
            alerts += self.annotator.annotate(&mut frame, &detections);
            self.prof_annotate += annotate_start.elapsed();

            frames.push(frame);
            self.prof_frames += 1;
            progress(self.prof_frames);

            if self.prof_frames % 300 == 0 {
                info!(
                    frames = self.prof_frames,
                    detect_ms_per_frame = format!(
                        "{:.2}",
                        self.prof_detect.as_secs_f64() * 1000.0 / self.prof_frames as f64
                    ),
                    annotate_ms_per_frame = format!(
                        "{:.2}",
                        self.prof_annotate.as_secs_f64() * 1000.0 / self.prof_frames as f64
                    ),
                    "pipeline timings"
                );
            }
        }

        info!(frames = frames.len(), alerts, "video processed");
        Ok(ProcessedVideo { frames, alerts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{BBox, Detection};
    use crate::geometry::FencePolygon;
    use anyhow::bail;

    const W: u32 = 320;
    const H: u32 = 240;

    /// Feeds a fixed number of synthetic frames.
    struct VecSource {
        remaining: usize,
    }

    impl FrameSource for VecSource {
        fn next_frame(&mut self) -> Result<Option<RgbFrame>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(RgbFrame {
                data: vec![0u8; (W * H * 3) as usize],
                width: W,
                height: H,
                pts: 0,
            }))
        }
    }

    /// Returns a scripted detection list per frame, in order.
    struct ScriptedDetector {
        script: Vec<Vec<Detection>>,
        cursor: usize,
        fail: bool,
    }

    impl ObjectDetector for ScriptedDetector {
        fn detect(&mut self, _frame: &RgbFrame) -> Result<Vec<Detection>> {
            if self.fail {
                bail!("scripted inference failure");
            }
            let dets = self.script.get(self.cursor).cloned().unwrap_or_default();
            self.cursor += 1;
            Ok(dets)
        }
    }

    fn det(x1: f32, y1: f32, class_id: usize) -> Detection {
        Detection {
            bbox: BBox {
                x1,
                y1,
                x2: x1 + 20.0,
                y2: y1 + 20.0,
            },
            class_id,
            confidence: 0.8,
        }
    }

    fn annotator() -> Annotator {
        // Square fence: x and y in [50, 150].
        let fence = FencePolygon::new(vec![(50, 50), (150, 50), (150, 150), (50, 150)]).unwrap();
        Annotator::new(fence, None)
    }

    #[test]
    fn frame_count_round_trips_and_alerts_sum_over_frames() {
        let detector = ScriptedDetector {
            script: vec![
                vec![det(80.0, 80.0, 0)],                                    // 1 alert
                vec![det(80.0, 80.0, 0), det(80.0, 80.0, 16), det(200.0, 200.0, 0)], // 1 alert
                vec![],                                                      // 0 alerts
                vec![det(60.0, 60.0, 0), det(100.0, 100.0, 0)],              // 2 alerts
            ],
            cursor: 0,
            fail: false,
        };

        let mut pipeline = Pipeline::new(detector, annotator());
        let out = pipeline
            .process_frames(VecSource { remaining: 4 })
            .unwrap();

        assert_eq!(out.frames.len(), 4);
        assert_eq!(out.alerts, 4);
        assert!(out
            .frames
            .iter()
            .all(|f| f.width == W && f.height == H));
    }

    #[test]
    fn same_person_across_frames_counts_every_frame() {
        // No identity dedup: N frames with the same trespasser yield N alerts.
        let detector = ScriptedDetector {
            script: vec![vec![det(80.0, 80.0, 0)]; 5],
            cursor: 0,
            fail: false,
        };
        let mut pipeline = Pipeline::new(detector, annotator());
        let out = pipeline
            .process_frames(VecSource { remaining: 5 })
            .unwrap();
        assert_eq!(out.alerts, 5);
    }

    #[test]
    fn empty_source_yields_no_frames_and_no_alerts() {
        let detector = ScriptedDetector {
            script: vec![],
            cursor: 0,
            fail: false,
        };
        let mut pipeline = Pipeline::new(detector, annotator());
        let out = pipeline
            .process_frames(VecSource { remaining: 0 })
            .unwrap();
        assert!(out.frames.is_empty());
        assert_eq!(out.alerts, 0);
    }

    #[test]
    fn inference_failure_is_fatal() {
        let detector = ScriptedDetector {
            script: vec![],
            cursor: 0,
            fail: true,
        };
        let mut pipeline = Pipeline::new(detector, annotator());
        assert!(pipeline.process_frames(VecSource { remaining: 1 }).is_err());
    }

    #[test]
    fn unreadable_input_is_recoverable_with_zero_results() {
        let detector = ScriptedDetector {
            script: vec![],
            cursor: 0,
            fail: false,
        };
        let mut pipeline = Pipeline::new(detector, annotator());
        let outcome = pipeline
            .process_video("/definitely/not/a/video.mp4")
            .unwrap();
        assert!(outcome.is_none());
    }
}
