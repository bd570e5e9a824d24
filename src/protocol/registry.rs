//! Detector registry
//!
//! Detectors are kept in registration order and evaluated in that order, so
//! more specific detectors must be registered before more general ones when
//! their prefixes overlap.

use log::trace;
use std::fmt;
use std::sync::Arc;

use super::detector::ProtocolDetector;
use crate::common::{AcceptorError, Result};

/// Outcome of evaluating the registry against a pending buffer
#[derive(Clone)]
pub enum DetectionResult {
    /// The first eligible detector that accepted the buffer
    Matched(Arc<dyn ProtocolDetector>),
    /// At least one detector still needs more bytes before it can decide
    NeedMoreData,
    /// Every detector was eligible and every one rejected the buffer
    NoMatch,
}

impl fmt::Debug for DetectionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Matched(detector) => f.debug_tuple("Matched").field(&detector.name()).finish(),
            Self::NeedMoreData => write!(f, "NeedMoreData"),
            Self::NoMatch => write!(f, "NoMatch"),
        }
    }
}

/// Insertion-ordered set of detectors keyed by name
#[derive(Default, Clone)]
pub struct DetectorRegistry {
    detectors: Vec<Arc<dyn ProtocolDetector>>,
}

impl DetectorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a detector
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a detector with the same name is
    /// already registered or when the detector requires zero bytes.
    pub fn register(&mut self, detector: Arc<dyn ProtocolDetector>) -> Result<()> {
        let name = detector.name();

        if self.get(name).is_some() {
            return Err(AcceptorError::Configuration(format!(
                "Detector '{}' is already registered",
                name
            )));
        }

        if detector.required_size() == 0 {
            return Err(AcceptorError::Configuration(format!(
                "Detector '{}' must require at least one byte",
                name
            )));
        }

        self.detectors.push(detector);
        Ok(())
    }

    /// Look up a detector by name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ProtocolDetector>> {
        self.detectors.iter().find(|d| d.name() == name)
    }

    /// Iterate in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ProtocolDetector>> {
        self.detectors.iter()
    }

    /// Registered names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Evaluate every eligible detector against `data`
    ///
    /// The first eligible detector in registration order whose predicate
    /// accepts the buffer wins.
    pub fn detect(&self, data: &[u8]) -> DetectionResult {
        let mut waiting = false;

        for detector in &self.detectors {
            if data.len() < detector.required_size() {
                waiting = true;
                continue;
            }

            if detector.detect(data) {
                trace!("Detector '{}' matched {} bytes", detector.name(), data.len());
                return DetectionResult::Matched(Arc::clone(detector));
            }
        }

        if waiting {
            DetectionResult::NeedMoreData
        } else {
            DetectionResult::NoMatch
        }
    }
}

impl fmt::Debug for DetectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
