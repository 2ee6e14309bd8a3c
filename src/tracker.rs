use std::time::Instant;

use image::GrayImage;
use log::{debug, info, trace, warn};

use crate::{
    config::TrackerConfig,
    detector::{Detector, KeypointDetector},
    error::{Result, TrackError},
    extractor::{DescriptorExtractor, Extractor},
    features::{Descriptors, Match},
    frame::Frame,
    matcher::DescriptorMatcher,
    roi,
    window::FrameWindow,
};

/// Tracking states
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    #[default]
    AwaitingFirstFrame,
    /// One frame resident, nothing to match it against yet
    AwaitingSecondFrame,
    /// Every new frame is matched against its predecessor
    Steady,
}

/// Frame-to-frame keypoint tracker.
///
/// Each image goes through detection, the optional region of interest and
/// keypoint cap, description and finally matching against the previous frame.
/// Only the last `window_capacity` frames are kept.
pub struct Tracker {
    config: TrackerConfig,
    detector: Detector,
    extractor: Extractor,
    matcher: DescriptorMatcher,
    window: FrameWindow<Frame>,
    state: TrackerState,
    frames_processed: u64,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;

        let extractor = Extractor::from(&config.descriptor);
        let matcher = DescriptorMatcher::new(config.matcher, extractor.format())?;
        info!(
            "tracking with {} keypoints and {} descriptors over {} frames",
            config.detector.name(),
            config.descriptor.name(),
            config.window_capacity
        );

        Ok(Self {
            detector: Detector::from(&config.detector),
            extractor,
            matcher,
            window: FrameWindow::new(config.window_capacity)?,
            state: TrackerState::default(),
            frames_processed: 0,
            config,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    /// Frames seen since construction, including evicted ones
    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Frames currently held in the window
    pub fn resident_frames(&self) -> usize {
        self.window.len()
    }

    /// The `k`-th most recent frame, `frame(0)` being the newest
    pub fn frame(&self, k: usize) -> Result<&Frame> {
        self.window.at(k)
    }

    /// Runs the whole pipeline on `image` and returns the resulting frame
    pub fn process(&mut self, image: GrayImage) -> Result<&Frame> {
        let descriptors = Descriptors::empty(self.extractor.format());
        self.push(Frame::described(image, Vec::new(), descriptors));

        let frame = self.window.at_mut(0)?;

        let started = Instant::now();
        frame.keypoints = self.detector.detect(&frame.image);
        let detected = frame.keypoints.len();

        if let Some(roi) = &self.config.roi {
            roi::filter_keypoints(&mut frame.keypoints, roi);
        }
        if let Some(max) = self.config.max_keypoints {
            roi::retain_best(&mut frame.keypoints, max);
        }
        frame.timings.detection = started.elapsed();

        let started = Instant::now();
        frame.descriptors = self.extractor.compute(&frame.image, &mut frame.keypoints);
        frame.timings.description = started.elapsed();

        debug!(
            "frame {}: {} {} keypoints ({} kept) in {:?}, {} {} descriptors in {:?}",
            frame.sequence,
            detected,
            self.config.detector.name(),
            frame.keypoints.len(),
            frame.timings.detection,
            frame.descriptors.len(),
            self.config.descriptor.name(),
            frame.timings.description
        );
        if frame.keypoints.is_empty() {
            warn!("frame {} has no describable keypoints", frame.sequence);
        }

        self.match_newest()
    }

    /// Admits a frame that was already described and matches it like
    /// [`Tracker::process`] would.
    ///
    /// Detection and description are skipped; the frame keeps its keypoints and
    /// descriptors as given. A frame whose descriptor count differs from its
    /// keypoint count is rejected and never enters the window.
    pub fn admit(&mut self, frame: Frame) -> Result<&Frame> {
        if frame.descriptors.len() != frame.keypoints.len() {
            return Err(TrackError::MisalignedFrame {
                keypoints: frame.keypoints.len(),
                descriptors: frame.descriptors.len(),
            });
        }
        self.push(frame);
        self.match_newest()
    }

    /// Matches the previous frame (query) against the newest one (reference)
    /// without storing the result
    pub fn match_latest(&self) -> Result<Vec<Match>> {
        let previous = self.window.at(1)?;
        let current = self.window.at(0)?;
        self.matcher
            .match_descriptors(&previous.descriptors, &current.descriptors)
    }

    fn push(&mut self, mut frame: Frame) {
        frame.sequence = self.frames_processed;
        frame.matches.clear();
        self.frames_processed += 1;

        if let Some(evicted) = self.window.push(frame) {
            trace!("evicted frame {}", evicted.sequence);
        }

        self.state = if self.window.len() < 2 {
            TrackerState::AwaitingSecondFrame
        } else {
            TrackerState::Steady
        };
    }

    fn match_newest(&mut self) -> Result<&Frame> {
        if self.state != TrackerState::Steady {
            return self.window.at(0);
        }

        let started = Instant::now();
        let matches = self.match_latest()?;
        let frame = self.window.at_mut(0)?;
        frame.matches = matches;
        frame.timings.matching = started.elapsed();

        debug!(
            "frame {}: {} matches in {:?}",
            frame.sequence,
            frame.matches.len(),
            frame.timings.matching
        );
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use image::Luma;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use crate::{
        algorithms::brief::BriefParams,
        config::{DescriptorConfig, DetectorConfig, MatcherConfig, MatcherMetric},
        features::{BinaryDescriptor, DescriptorFormat, Keypoint},
        roi::Roi,
    };

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Bright rectangles of random size and brightness on a dark background
    fn scene(seed: u64, shift: (u32, u32)) -> GrayImage {
        let mut rng = StdRng::seed_from_u64(seed);
        let rects: Vec<(u32, u32, u32, u32, u8)> = (0..30)
            .map(|_| {
                (
                    rng.gen_range(20..180),
                    rng.gen_range(20..130),
                    rng.gen_range(5..16),
                    rng.gen_range(5..16),
                    rng.gen_range(90..250),
                )
            })
            .collect();

        GrayImage::from_fn(220, 170, |x, y| {
            let (x, y) = (x as i64 - shift.0 as i64, y as i64 - shift.1 as i64);
            let mut value = 25;
            for &(rx, ry, w, h, v) in &rects {
                if x >= rx as i64 && x < (rx + w) as i64 && y >= ry as i64 && y < (ry + h) as i64 {
                    value = v;
                }
            }
            Luma([value])
        })
    }

    fn described(descriptors: Vec<BinaryDescriptor>) -> Frame {
        let keypoints = (0..descriptors.len())
            .map(|i| Keypoint::new(i as f32, 0.0))
            .collect();
        Frame::described(GrayImage::new(1, 1), keypoints, Descriptors::Binary(descriptors))
    }

    #[test]
    fn state_follows_the_stream() {
        init_logger();
        let mut tracker = Tracker::new(TrackerConfig::default()).unwrap();
        assert_eq!(tracker.state(), TrackerState::AwaitingFirstFrame);
        assert!(tracker.frame(0).is_err());

        let first = tracker.process(scene(1, (0, 0))).unwrap();
        assert!(first.matches.is_empty());
        assert_eq!(tracker.state(), TrackerState::AwaitingSecondFrame);

        tracker.process(scene(1, (0, 0))).unwrap();
        assert_eq!(tracker.state(), TrackerState::Steady);

        tracker.process(scene(1, (0, 0))).unwrap();
        assert_eq!(tracker.state(), TrackerState::Steady);
        assert_eq!(tracker.frames_processed(), 3);
        assert_eq!(tracker.resident_frames(), 2);
        assert_eq!(tracker.frame(0).unwrap().sequence, 2);
        assert_eq!(tracker.frame(1).unwrap().sequence, 1);
    }

    #[test]
    fn tracks_a_shifted_scene() {
        init_logger();
        let mut tracker = Tracker::new(TrackerConfig {
            detector: DetectorConfig::Fast(Default::default()),
            ..TrackerConfig::default()
        })
        .unwrap();

        tracker.process(scene(2, (0, 0))).unwrap();
        let frame = tracker.process(scene(2, (3, 2))).unwrap();
        assert!(!frame.matches.is_empty());
        assert!(frame.match_ratio().unwrap() > 0.5);

        let previous = tracker.frame(1).unwrap();
        let current = tracker.frame(0).unwrap();
        let consistent = current
            .matches
            .iter()
            .filter(|m| {
                let a = &previous.keypoints[m.query_index];
                let b = &current.keypoints[m.reference_index];
                (b.x() - a.x() - 3.0).abs() < 1.0 && (b.y() - a.y() - 2.0).abs() < 1.0
            })
            .count();
        assert!(consistent * 10 >= current.matches.len() * 9);
    }

    #[test]
    fn every_pipeline_keeps_frames_aligned() {
        init_logger();
        for (detector, descriptor) in [
            ("SHITOMASI", "BRIEF"),
            ("HARRIS", "ORB"),
            ("ORB", "ORB"),
            ("FAST", "SIFT"),
            ("SIFT", "SIFT"),
        ] {
            let config = TrackerConfig::from_names(detector, descriptor).unwrap();
            let mut tracker = Tracker::new(config).unwrap();
            tracker.process(scene(3, (0, 0))).unwrap();
            let frame = tracker.process(scene(3, (1, 1))).unwrap();

            assert_eq!(frame.keypoints.len(), frame.descriptors.len());
            assert_eq!(frame.descriptors.format(), config.descriptor.format());
            for m in &frame.matches {
                assert!(m.reference_index < frame.keypoints.len());
            }
        }
    }

    #[test]
    fn roi_and_cap_limit_keypoints() {
        let roi = Roi::new(40.0, 30.0, 120.0, 100.0);
        let mut tracker = Tracker::new(TrackerConfig {
            roi: Some(roi),
            max_keypoints: Some(10),
            ..TrackerConfig::default()
        })
        .unwrap();

        let frame = tracker.process(scene(4, (0, 0))).unwrap();
        assert!(!frame.keypoints.is_empty());
        assert!(frame.keypoints.len() <= 10);
        assert!(frame.keypoints.iter().all(|k| roi.contains(&k.position)));
    }

    #[test]
    fn empty_images_flow_through() {
        let mut tracker = Tracker::new(TrackerConfig::default()).unwrap();
        for _ in 0..3 {
            let frame = tracker.process(GrayImage::new(0, 0)).unwrap();
            assert!(frame.keypoints.is_empty());
            assert!(frame.descriptors.is_empty());
            assert!(frame.matches.is_empty());
            assert_eq!(frame.match_ratio(), None);
        }
        assert_eq!(tracker.state(), TrackerState::Steady);
    }

    #[test]
    fn fresh_frames_carry_the_extractor_format() {
        let config = TrackerConfig::from_names("FAST", "SIFT").unwrap();
        let mut tracker = Tracker::new(config).unwrap();
        let frame = tracker.process(GrayImage::new(0, 0)).unwrap();
        assert!(frame.descriptors.is_empty());
        assert_eq!(frame.descriptors.format(), DescriptorFormat::Float);
    }

    #[test]
    fn window_keeps_only_adjacent_frames() {
        let a = [0u8; 32];
        let mut b = a;
        b[0] = 1;
        let mut c = [0xffu8; 32];
        c[31] = 0x7f;

        let mut tracker = Tracker::new(TrackerConfig {
            matcher: MatcherConfig {
                selection: crate::config::SelectionPolicy::NearestNeighbor,
                ..MatcherConfig::default()
            },
            ..TrackerConfig::default()
        })
        .unwrap();

        tracker.admit(described(vec![a])).unwrap();
        let frame = tracker.admit(described(vec![b])).unwrap();
        assert_eq!(
            frame.matches,
            vec![Match {
                query_index: 0,
                reference_index: 0,
                distance: 1.0
            }]
        );

        // C evicts A, matching now pairs B with C
        tracker.admit(described(vec![c])).unwrap();
        assert_eq!(tracker.resident_frames(), 2);
        let matches = tracker.match_latest().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].distance, 254.0);
        assert_eq!(tracker.frame(2).unwrap_err(), TrackError::OutOfRange { index: 2, len: 2 });
    }

    #[test]
    fn mismatched_frames_are_reported() {
        let mut tracker = Tracker::new(TrackerConfig::default()).unwrap();
        tracker.admit(described(vec![[0; 32]])).unwrap();

        let float = Frame::described(
            GrayImage::new(1, 1),
            vec![Keypoint::new(0.0, 0.0)],
            Descriptors::Float(vec![vec![0.0; 128]]),
        );
        assert_eq!(
            tracker.admit(float).unwrap_err(),
            TrackError::FormatMismatch {
                query: DescriptorFormat::Binary,
                reference: DescriptorFormat::Float
            }
        );
        // the frame is resident even though matching failed
        assert_eq!(tracker.resident_frames(), 2);
    }

    #[test]
    fn misaligned_frames_are_not_admitted() {
        let mut tracker = Tracker::new(TrackerConfig {
            matcher: MatcherConfig {
                selection: crate::config::SelectionPolicy::NearestNeighbor,
                ..MatcherConfig::default()
            },
            ..TrackerConfig::default()
        })
        .unwrap();
        tracker.admit(described(vec![[0; 32], [1; 32]])).unwrap();

        let orphaned = Frame::described(
            GrayImage::new(1, 1),
            Vec::new(),
            Descriptors::Binary(vec![[0; 32], [1; 32]]),
        );
        assert_eq!(
            tracker.admit(orphaned).unwrap_err(),
            TrackError::MisalignedFrame {
                keypoints: 0,
                descriptors: 2
            }
        );
        assert_eq!(tracker.resident_frames(), 1);
        assert_eq!(tracker.frames_processed(), 1);
        assert_eq!(tracker.state(), TrackerState::AwaitingSecondFrame);
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        assert!(Tracker::new(TrackerConfig {
            window_capacity: 1,
            ..TrackerConfig::default()
        })
        .is_err());

        let sift_with_hamming = TrackerConfig {
            descriptor: DescriptorConfig::Sift(Default::default()),
            matcher: MatcherConfig {
                metric: MatcherMetric::Hamming,
                ..MatcherConfig::default()
            },
            ..TrackerConfig::default()
        };
        assert!(matches!(
            Tracker::new(sift_with_hamming),
            Err(TrackError::IncompatibleMetric { .. })
        ));

        let unblurred = TrackerConfig {
            descriptor: DescriptorConfig::Brief(BriefParams { smoothing_sigma: 0.0 }),
            ..TrackerConfig::default()
        };
        assert!(matches!(
            Tracker::new(unblurred),
            Err(TrackError::InvalidParameter { stage: "brief", .. })
        ));
    }
}
