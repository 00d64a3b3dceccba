//! Facial-region feature descriptors.
//!
//! Each supported region carries the mask parameters the region selector
//! node needs, plus an optional fixed strength that replaces whatever
//! strength the caller asked for.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Mask and strength settings for one selectable region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDescriptor {
    /// Region identifier understood by the region selector node.
    pub region: String,
    /// Mask dilation in pixels.
    pub grow: u32,
    /// Mask feathering radius in pixels.
    pub blur: u32,
    /// When set, always used as the sampler strength for this region.
    pub strength_override: Option<f64>,
}

impl FeatureDescriptor {
    pub fn new(region: &str, grow: u32, blur: u32, strength_override: Option<f64>) -> Self {
        Self {
            region: region.to_string(),
            grow,
            blur,
            strength_override,
        }
    }
}

/// The set of regions offered by a deployment, fixed at startup.
#[derive(Debug, Clone)]
pub struct FeatureCatalog {
    features: HashMap<String, FeatureDescriptor>,
}

impl FeatureCatalog {
    pub fn new(features: impl IntoIterator<Item = FeatureDescriptor>) -> Self {
        Self {
            features: features
                .into_iter()
                .map(|f| (f.region.clone(), f))
                .collect(),
        }
    }

    pub fn get(&self, region: &str) -> Option<&FeatureDescriptor> {
        self.features.get(region)
    }

    /// Resolve requested region names, rejecting unknown ones.
    pub fn resolve(&self, regions: &[String]) -> Result<Vec<FeatureDescriptor>, CoreError> {
        regions
            .iter()
            .map(|region| {
                self.get(region.trim()).cloned().ok_or_else(|| {
                    CoreError::Validation(format!(
                        "Unknown feature '{}'; supported features: {}",
                        region.trim(),
                        self.regions().join(", ")
                    ))
                })
            })
            .collect()
    }

    /// Supported region names, sorted.
    pub fn regions(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.features.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for FeatureCatalog {
    fn default() -> Self {
        Self::new([
            FeatureDescriptor::new("eyes", 8, 4, Some(0.45)),
            FeatureDescriptor::new("eyebrows", 6, 3, Some(0.40)),
            FeatureDescriptor::new("lips", 6, 3, Some(0.50)),
            FeatureDescriptor::new("nose", 10, 5, None),
            FeatureDescriptor::new("skin", 4, 8, None),
            FeatureDescriptor::new("hair", 16, 6, Some(0.60)),
        ])
    }
}
