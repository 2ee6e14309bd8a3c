//! Pipeline configuration.
//!
//! Every stage is chosen from a closed set of variants, each carrying its own
//! parameters. Configurations deserialize from any serde format; missing fields
//! take their defaults and unknown fields are rejected.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{
    algorithms::{
        brief::BriefParams,
        corners::{HarrisParams, ShiTomasiParams},
        kd_forest::ForestParams,
        orb::{OrbDescriptorParams, OrbParams},
        sift::{SiftDescriptorParams, SiftParams},
    },
    detector::FastParams,
    error::{Result, TrackError},
    features::DescriptorFormat,
    roi::Roi,
    window::FrameWindow,
};

/// Resolve `name` against `(alias, value)` pairs, ignoring ASCII case
fn parse_variant<T: Copy>(stage: &'static str, name: &str, table: &[(&str, T)]) -> Result<T> {
    table
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(name.trim()))
        .map(|&(_, value)| value)
        .ok_or_else(|| TrackError::UnknownVariant {
            stage,
            name: name.to_string(),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectorConfig {
    ShiTomasi(ShiTomasiParams),
    Harris(HarrisParams),
    Fast(FastParams),
    Orb(OrbParams),
    Sift(SiftParams),
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::ShiTomasi(ShiTomasiParams::default())
    }
}

impl DetectorConfig {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ShiTomasi(_) => "SHITOMASI",
            Self::Harris(_) => "HARRIS",
            Self::Fast(_) => "FAST",
            Self::Orb(_) => "ORB",
            Self::Sift(_) => "SIFT",
        }
    }

    /// Rejects parameters the detector cannot run with
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ShiTomasi(params) => params.validate(),
            Self::Harris(params) => params.validate(),
            Self::Fast(_) => Ok(()),
            Self::Orb(params) => params.validate(),
            Self::Sift(params) => params.validate(),
        }
    }
}

/// Parses a detector name with default parameters
impl FromStr for DetectorConfig {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self> {
        #[derive(Clone, Copy)]
        enum Kind {
            ShiTomasi,
            Harris,
            Fast,
            Orb,
            Sift,
        }

        let kind = parse_variant(
            "detector",
            s,
            &[
                ("SHITOMASI", Kind::ShiTomasi),
                ("SHI_TOMASI", Kind::ShiTomasi),
                ("GFTT", Kind::ShiTomasi),
                ("HARRIS", Kind::Harris),
                ("FAST", Kind::Fast),
                ("ORB", Kind::Orb),
                ("SIFT", Kind::Sift),
            ],
        )?;

        Ok(match kind {
            Kind::ShiTomasi => Self::ShiTomasi(Default::default()),
            Kind::Harris => Self::Harris(Default::default()),
            Kind::Fast => Self::Fast(Default::default()),
            Kind::Orb => Self::Orb(Default::default()),
            Kind::Sift => Self::Sift(Default::default()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DescriptorConfig {
    Brief(BriefParams),
    Orb(OrbDescriptorParams),
    Sift(SiftDescriptorParams),
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self::Brief(BriefParams::default())
    }
}

impl DescriptorConfig {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Brief(_) => "BRIEF",
            Self::Orb(_) => "ORB",
            Self::Sift(_) => "SIFT",
        }
    }

    /// The format every descriptor of this variant has
    pub fn format(&self) -> DescriptorFormat {
        match self {
            Self::Brief(_) | Self::Orb(_) => DescriptorFormat::Binary,
            Self::Sift(_) => DescriptorFormat::Float,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Brief(params) => params.validate(),
            Self::Orb(params) => params.validate(),
            Self::Sift(params) => params.validate(),
        }
    }
}

/// Parses a descriptor name with default parameters
impl FromStr for DescriptorConfig {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self> {
        #[derive(Clone, Copy)]
        enum Kind {
            Brief,
            Orb,
            Sift,
        }

        let kind = parse_variant(
            "descriptor",
            s,
            &[
                ("BRIEF", Kind::Brief),
                ("ORB", Kind::Orb),
                ("SIFT", Kind::Sift),
            ],
        )?;

        Ok(match kind {
            Kind::Brief => Self::Brief(Default::default()),
            Kind::Orb => Self::Orb(Default::default()),
            Kind::Sift => Self::Sift(Default::default()),
        })
    }
}

/// Distance used to compare descriptors
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherMetric {
    #[default]
    Hamming,
    L2,
}

impl MatcherMetric {
    /// The descriptor format this metric is defined on
    pub fn format(&self) -> DescriptorFormat {
        match self {
            Self::Hamming => DescriptorFormat::Binary,
            Self::L2 => DescriptorFormat::Float,
        }
    }

    pub fn for_format(format: DescriptorFormat) -> Self {
        match format {
            DescriptorFormat::Binary => Self::Hamming,
            DescriptorFormat::Float => Self::L2,
        }
    }
}

impl FromStr for MatcherMetric {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self> {
        parse_variant(
            "metric",
            s,
            &[
                ("HAMMING", Self::Hamming),
                ("DES_BINARY", Self::Hamming),
                ("L2", Self::L2),
                ("DES_HOG", Self::L2),
            ],
        )
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Compare every query against every reference descriptor
    #[default]
    Exhaustive,
    /// Randomized k-d forest, may miss the true nearest neighbour
    Approximate,
}

impl FromStr for SearchStrategy {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self> {
        parse_variant(
            "search",
            s,
            &[
                ("EXHAUSTIVE", Self::Exhaustive),
                ("MAT_BF", Self::Exhaustive),
                ("APPROXIMATE", Self::Approximate),
                ("MAT_FLANN", Self::Approximate),
            ],
        )
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Keep the single nearest reference for every query
    NearestNeighbor,
    /// Keep the nearest reference only if it is clearly closer than the second
    #[default]
    RatioTest,
}

impl FromStr for SelectionPolicy {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self> {
        parse_variant(
            "selection",
            s,
            &[
                ("NEAREST_NEIGHBOR", Self::NearestNeighbor),
                ("NN", Self::NearestNeighbor),
                ("SEL_NN", Self::NearestNeighbor),
                ("RATIO_TEST", Self::RatioTest),
                ("KNN", Self::RatioTest),
                ("SEL_KNN", Self::RatioTest),
            ],
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatcherConfig {
    pub metric: MatcherMetric,
    pub search: SearchStrategy,
    pub selection: SelectionPolicy,
    /// Lowe's ratio, only read by [`SelectionPolicy::RatioTest`]
    pub ratio_threshold: f32,
    /// Each reference keypoint is matched at most once, the first query wins
    pub one_to_one: bool,
    /// Only read by [`SearchStrategy::Approximate`]
    pub forest: ForestParams,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            metric: MatcherMetric::Hamming,
            search: SearchStrategy::Exhaustive,
            selection: SelectionPolicy::RatioTest,
            ratio_threshold: 0.8,
            one_to_one: false,
            forest: ForestParams::default(),
        }
    }
}

impl MatcherConfig {
    /// Checks the configuration against the descriptor format it will be fed
    pub fn validate(&self, format: DescriptorFormat) -> Result<()> {
        if self.metric.format() != format {
            return Err(TrackError::IncompatibleMetric {
                metric: self.metric,
                format,
            });
        }

        let ratio = self.ratio_threshold;
        if self.selection == SelectionPolicy::RatioTest && !(ratio > 0.0 && ratio <= 1.0) {
            return Err(TrackError::InvalidRatio(ratio));
        }

        self.forest.validate()
    }
}

/// Full pipeline configuration, fixed for the lifetime of a [`crate::Tracker`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    pub detector: DetectorConfig,
    pub descriptor: DescriptorConfig,
    /// Keypoints outside this rectangle are dropped before description
    pub roi: Option<Roi>,
    /// Keypoints kept per frame, strongest first when the detector ranks them
    pub max_keypoints: Option<usize>,
    pub matcher: MatcherConfig,
    pub window_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            descriptor: DescriptorConfig::default(),
            roi: None,
            max_keypoints: None,
            matcher: MatcherConfig::default(),
            window_capacity: FrameWindow::<()>::MIN_CAPACITY,
        }
    }
}

impl TrackerConfig {
    /// A configuration for the named stages, with the metric following the
    /// descriptor format.
    ///
    /// ```
    /// use featrack::config::{MatcherMetric, TrackerConfig};
    ///
    /// let config = TrackerConfig::from_names("FAST", "SIFT").unwrap();
    /// assert_eq!(config.matcher.metric, MatcherMetric::L2);
    /// assert!(TrackerConfig::from_names("BRISK", "BRIEF").is_err());
    /// ```
    pub fn from_names(detector: &str, descriptor: &str) -> Result<Self> {
        let descriptor: DescriptorConfig = descriptor.parse()?;
        Ok(Self {
            detector: detector.parse()?,
            descriptor,
            matcher: MatcherConfig {
                metric: MatcherMetric::for_format(descriptor.format()),
                ..MatcherConfig::default()
            },
            ..Self::default()
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_capacity < FrameWindow::<()>::MIN_CAPACITY {
            return Err(TrackError::InvalidCapacity(self.window_capacity));
        }
        if self.roi.map_or(false, |roi| !roi.is_valid()) {
            return Err(TrackError::InvalidRoi);
        }
        if self.max_keypoints == Some(0) {
            return Err(TrackError::InvalidKeypointCap);
        }
        self.detector.validate()?;
        self.descriptor.validate()?;
        self.matcher.validate(self.descriptor.format())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TrackerConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.window_capacity, 2);
        assert_eq!(config.matcher.ratio_threshold, 0.8);
    }

    #[test]
    fn parses_names_case_insensitively() {
        assert!(matches!("harris".parse::<DetectorConfig>(), Ok(DetectorConfig::Harris(_))));
        assert!(matches!("ShiTomasi".parse::<DetectorConfig>(), Ok(DetectorConfig::ShiTomasi(_))));
        assert!(matches!("SIFT".parse::<DescriptorConfig>(), Ok(DescriptorConfig::Sift(_))));
        assert_eq!("MAT_FLANN".parse::<SearchStrategy>(), Ok(SearchStrategy::Approximate));
        assert_eq!("sel_nn".parse::<SelectionPolicy>(), Ok(SelectionPolicy::NearestNeighbor));
        assert_eq!("DES_HOG".parse::<MatcherMetric>(), Ok(MatcherMetric::L2));
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert_eq!(
            "BRISK".parse::<DetectorConfig>(),
            Err(TrackError::UnknownVariant {
                stage: "detector",
                name: "BRISK".to_string()
            })
        );
        assert!("FREAK".parse::<DescriptorConfig>().is_err());
        assert!("cosine".parse::<MatcherMetric>().is_err());
    }

    #[test]
    fn metric_must_fit_the_descriptor() {
        let config = TrackerConfig {
            descriptor: DescriptorConfig::Sift(Default::default()),
            ..TrackerConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(TrackError::IncompatibleMetric {
                metric: MatcherMetric::Hamming,
                format: DescriptorFormat::Float
            })
        );
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = TrackerConfig {
            window_capacity: 1,
            ..TrackerConfig::default()
        };
        assert_eq!(config.validate(), Err(TrackError::InvalidCapacity(1)));

        config.window_capacity = 3;
        config.roi = Some(Roi::new(0.0, 0.0, 0.0, 10.0));
        assert_eq!(config.validate(), Err(TrackError::InvalidRoi));

        config.roi = Some(Roi::PRECEDING_VEHICLE);
        config.max_keypoints = Some(0);
        assert_eq!(config.validate(), Err(TrackError::InvalidKeypointCap));

        config.max_keypoints = Some(50);
        config.matcher.ratio_threshold = 1.5;
        assert_eq!(config.validate(), Err(TrackError::InvalidRatio(1.5)));

        // the ratio is irrelevant without the ratio test
        config.matcher.selection = SelectionPolicy::NearestNeighbor;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn rejects_stage_parameters_that_cannot_run() {
        let config = TrackerConfig {
            descriptor: DescriptorConfig::Brief(BriefParams { smoothing_sigma: 0.0 }),
            ..TrackerConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(TrackError::InvalidParameter {
                stage: "brief",
                parameter: "smoothing_sigma"
            })
        );

        let config = TrackerConfig {
            descriptor: DescriptorConfig::Orb(OrbDescriptorParams {
                smoothing_sigma: -1.0,
                ..OrbDescriptorParams::default()
            }),
            ..TrackerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TrackError::InvalidParameter {
                parameter: "smoothing_sigma",
                ..
            })
        ));

        let orb = |params| TrackerConfig {
            detector: DetectorConfig::Orb(params),
            ..TrackerConfig::default()
        };
        let zero_scale = orb(OrbParams {
            scale_factor: 0.0,
            ..OrbParams::default()
        });
        assert_eq!(
            zero_scale.validate(),
            Err(TrackError::InvalidParameter {
                stage: "orb",
                parameter: "scale_factor"
            })
        );
        let too_many_levels = orb(OrbParams {
            n_levels: 300,
            ..OrbParams::default()
        });
        assert_eq!(
            too_many_levels.validate(),
            Err(TrackError::InvalidParameter {
                stage: "orb",
                parameter: "n_levels"
            })
        );
        let deepest = orb(OrbParams {
            n_levels: 256,
            ..OrbParams::default()
        });
        assert_eq!(deepest.validate(), Ok(()));

        let config = TrackerConfig {
            detector: DetectorConfig::Sift(SiftParams {
                sigma: f32::NAN,
                ..SiftParams::default()
            }),
            ..TrackerConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::default();
        config.matcher.forest.checks = 0;
        assert_eq!(
            config.validate(),
            Err(TrackError::InvalidParameter {
                stage: "forest",
                parameter: "checks"
            })
        );
    }

    #[test]
    fn deserializes_partial_json() {
        let config: TrackerConfig = serde_json::from_str(
            r#"{
                "detector": { "kind": "harris", "k": 0.06 },
                "descriptor": { "kind": "sift" },
                "roi": { "x": 535, "y": 180, "width": 180, "height": 150 },
                "max_keypoints": 50,
                "matcher": { "metric": "l2", "search": "approximate", "one_to_one": true }
            }"#,
        )
        .unwrap();

        match config.detector {
            DetectorConfig::Harris(params) => {
                assert_eq!(params.k, 0.06);
                assert_eq!(params.block_radius, HarrisParams::default().block_radius);
            }
            other => panic!("unexpected detector {other:?}"),
        }
        assert_eq!(config.descriptor.format(), DescriptorFormat::Float);
        assert_eq!(config.roi, Some(Roi::PRECEDING_VEHICLE));
        assert_eq!(config.matcher.selection, SelectionPolicy::RatioTest);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(serde_json::from_str::<TrackerConfig>(r#"{ "windows": 3 }"#).is_err());
        assert!(serde_json::from_str::<TrackerConfig>(r#"{ "detector": { "kind": "brisk" } }"#).is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let config = TrackerConfig::from_names("ORB", "ORB").unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<TrackerConfig>(&json).unwrap(), config);
    }
}
