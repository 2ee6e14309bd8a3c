//! Frame-to-frame keypoint tracking for monocular image streams.
//!
//! Every incoming grayscale image is run through a configurable pipeline:
//! keypoint detection, an optional region of interest and keypoint cap,
//! descriptor extraction and matching against the previous frame. The last few
//! frames stay resident in a bounded [`window::FrameWindow`].
//!
//! ```
//! use featrack::{GrayImage, Tracker, TrackerConfig};
//!
//! let mut tracker = Tracker::new(TrackerConfig::from_names("FAST", "BRIEF")?)?;
//! for _ in 0..3 {
//!     let frame = tracker.process(GrayImage::new(64, 48))?;
//!     assert!(frame.matches.is_empty());
//! }
//! # Ok::<(), featrack::TrackError>(())
//! ```

pub mod algorithms;
pub mod config;
pub mod detector;
pub mod error;
pub mod extractor;
pub mod features;
pub mod frame;
pub mod matcher;
pub mod roi;
pub mod tracker;
pub mod window;

pub use image::GrayImage;

pub use config::{DescriptorConfig, DetectorConfig, MatcherConfig, TrackerConfig};
pub use error::{Result, TrackError};
pub use features::{DescriptorFormat, Descriptors, Keypoint, Match};
pub use frame::Frame;
pub use matcher::DescriptorMatcher;
pub use tracker::{Tracker, TrackerState};
