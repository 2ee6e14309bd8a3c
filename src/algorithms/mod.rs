//! Collection of the detection, description and search algorithms the
//! tracking pipeline is assembled from

pub mod brief;
pub mod corners;
pub mod fast;
pub mod kd_forest;
pub mod orb;
pub mod scale_space;
pub mod sift;
