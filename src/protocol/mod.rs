//! Protocol detection module
//!
//! This module defines the detector contract and the ordered registry the
//! dispatcher consults after every read.

mod detector;
mod registry;

pub use detector::{PrefixDetector, ProtocolDetector};
pub use registry::{DetectionResult, DetectorRegistry};
