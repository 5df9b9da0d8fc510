use super::{Instance, InstanceError, InstanceRegistry};
use crate::util::validate_instance_url;
use std::sync::Arc;

/// A fixed list of instances supplied at startup.
#[derive(Debug, Clone)]
pub struct StaticRegistry {
    instances: Vec<Arc<Instance>>,
}

impl StaticRegistry {
    /// Builds a registry from a comma-separated list of base URLs.
    ///
    /// Empty segments are skipped so that configs may carry trailing commas
    /// (handy for commenting out instances).
    ///
    /// # Errors
    ///
    /// - [`InstanceError::InvalidUrl`] if a segment is not an http(s) URL
    /// - [`InstanceError::NoInstances`] if nothing is left after skipping
    pub fn parse(list: &str) -> Result<Self, InstanceError> {
        let mut instances = Vec::new();
        for segment in list.split(',').map(str::trim) {
            if segment.is_empty() {
                continue;
            }
            let url = validate_instance_url(segment, true).map_err(|source| {
                InstanceError::InvalidUrl {
                    url: segment.to_string(),
                    source,
                }
            })?;
            instances.push(Arc::new(Instance::new(url)));
        }
        Self::new(instances)
    }

    pub fn new(instances: Vec<Arc<Instance>>) -> Result<Self, InstanceError> {
        if instances.is_empty() {
            return Err(InstanceError::NoInstances);
        }
        Ok(Self { instances })
    }
}

impl InstanceRegistry for StaticRegistry {
    fn all_instances(&self) -> Vec<Arc<Instance>> {
        self.instances.clone()
    }

    fn active_instances(&self) -> Vec<Arc<Instance>> {
        self.instances.clone()
    }
}
