//! Detector registry
//!
//! Populated once at process start, read-only afterwards. Lookups are by
//! stable detector name; listing order is priority ascending then name so
//! verdicts come out deterministically ordered.

use std::collections::{BTreeMap, BTreeSet};

use qualscan_core::{QualscanError, Result};

use crate::descriptor::{Detector, DetectorDescriptor};
use crate::{
    BlurDetector, BrightnessDetector, ColorDetector, ContrastDetector, NoiseDetector,
    OcclusionDetector, SignalLossDetector, StripeDetector,
};

/// Factory producing a fresh detector instance; detectors are cheap, one
/// per pipeline call is fine.
pub type DetectorFactory = fn() -> Result<Box<dyn Detector>>;

pub struct DetectorRegistry {
    entries: Vec<(&'static DetectorDescriptor, DetectorFactory)>,
}

impl DetectorRegistry {
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    /// All eight built-in image detectors
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        let builtins: [(&'static DetectorDescriptor, DetectorFactory); 8] = [
            (BlurDetector::descriptor_static(), BlurDetector::boxed),
            (BrightnessDetector::descriptor_static(), BrightnessDetector::boxed),
            (ContrastDetector::descriptor_static(), ContrastDetector::boxed),
            (ColorDetector::descriptor_static(), ColorDetector::boxed),
            (NoiseDetector::descriptor_static(), NoiseDetector::boxed),
            (StripeDetector::descriptor_static(), StripeDetector::boxed),
            (OcclusionDetector::descriptor_static(), OcclusionDetector::boxed),
            (SignalLossDetector::descriptor_static(), SignalLossDetector::boxed),
        ];
        for (descriptor, factory) in builtins {
            registry
                .register(descriptor, factory)
                .expect("built-in detector names are unique");
        }
        registry
    }

    pub fn register(
        &mut self,
        descriptor: &'static DetectorDescriptor,
        factory: DetectorFactory,
    ) -> Result<()> {
        if self.entries.iter().any(|(d, _)| d.name == descriptor.name) {
            return Err(QualscanError::Conflict(format!(
                "detector {} already registered",
                descriptor.name
            )));
        }
        self.entries.push((descriptor, factory));
        Ok(())
    }

    /// Descriptors in stable order: priority ascending, then name
    pub fn list(&self) -> Vec<&'static DetectorDescriptor> {
        let mut out: Vec<_> = self.entries.iter().map(|(d, _)| *d).collect();
        out.sort_by_key(|d| (d.priority, d.name));
        out
    }

    pub fn descriptor(&self, name: &str) -> Result<&'static DetectorDescriptor> {
        self.entries
            .iter()
            .find(|(d, _)| d.name == name)
            .map(|(d, _)| *d)
            .ok_or_else(|| QualscanError::UnknownDetector(name.to_string()))
    }

    pub fn instantiate(&self, name: &str) -> Result<Box<dyn Detector>> {
        let (_, factory) = self
            .entries
            .iter()
            .find(|(d, _)| d.name == name)
            .ok_or_else(|| QualscanError::UnknownDetector(name.to_string()))?;
        factory().map_err(|e| QualscanError::DetectorConstruction {
            name: name.to_string(),
            message: e.to_string(),
        })
    }

    /// Suppression edges derived from the descriptors
    pub fn suppression_graph(&self) -> BTreeMap<&'static str, BTreeSet<&'static str>> {
        self.entries
            .iter()
            .filter(|(d, _)| !d.suppresses.is_empty())
            .map(|(d, _)| (d.name, d.suppresses.iter().copied().collect()))
            .collect()
    }
}
