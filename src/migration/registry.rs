use super::step::VersionedStep;
use crate::core::{MigrationError, Result, SchemaVersion};

/// Every known step, ordered by target version.
#[derive(Debug, Clone, Default)]
pub struct StepRegistry {
    steps: Vec<VersionedStep>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a step. Version 0 and duplicate versions are rejected.
    pub fn register(&mut self, step: VersionedStep) -> Result<()> {
        let version = step.target_version();
        if version == 0 {
            return Err(MigrationError::Registry(format!(
                "step '{}' must target a version above 0",
                step.display_name()
            )));
        }
        match self
            .steps
            .binary_search_by_key(&version, VersionedStep::target_version)
        {
            Ok(existing) => Err(MigrationError::Registry(format!(
                "version {} is already registered by '{}'",
                version,
                self.steps[existing].display_name()
            ))),
            Err(position) => {
                self.steps.insert(position, step);
                Ok(())
            }
        }
    }

    pub fn with_step(mut self, step: VersionedStep) -> Result<Self> {
        self.register(step)?;
        Ok(self)
    }

    /// Steps with `current < version <= target`, ascending.
    pub fn select(&self, current: SchemaVersion, target: SchemaVersion) -> Vec<&VersionedStep> {
        self.steps
            .iter()
            .filter(|step| step.target_version() > current && step.target_version() <= target)
            .collect()
    }

    /// Highest registered version, or 0 when empty.
    pub fn latest_version(&self) -> SchemaVersion {
        self.steps.last().map(VersionedStep::target_version).unwrap_or(0)
    }

    pub fn get(&self, version: SchemaVersion) -> Option<&VersionedStep> {
        self.steps
            .binary_search_by_key(&version, VersionedStep::target_version)
            .ok()
            .map(|index| &self.steps[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &VersionedStep> {
        self.steps.iter()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(versions: &[SchemaVersion]) -> StepRegistry {
        let mut registry = StepRegistry::new();
        for version in versions {
            registry
                .register(VersionedStep::new(*version, format!("step {}", version)))
                .unwrap();
        }
        registry
    }

    #[test]
    fn keeps_steps_sorted_regardless_of_registration_order() {
        let registry = registry(&[7, 3, 5]);
        let versions: Vec<_> = registry.iter().map(|step| step.target_version()).collect();
        assert_eq!(versions, vec![3, 5, 7]);
        assert_eq!(registry.latest_version(), 7);
    }

    #[test]
    fn select_is_exclusive_below_and_inclusive_above() {
        let registry = registry(&[3, 5, 7]);
        let picked: Vec<_> = registry
            .select(3, 7)
            .iter()
            .map(|step| step.target_version())
            .collect();
        assert_eq!(picked, vec![5, 7]);
        assert!(registry.select(7, 7).is_empty());
        assert!(registry.select(9, 4).is_empty());
    }

    #[test]
    fn rejects_zero_and_duplicates() {
        let mut registry = registry(&[2]);
        assert!(matches!(
            registry.register(VersionedStep::new(2, "again")),
            Err(MigrationError::Registry(_))
        ));
        assert!(registry.register(VersionedStep::new(0, "zero")).is_err());
        assert_eq!(registry.len(), 1);
        assert!(registry.get(2).is_some());
        assert!(registry.get(4).is_none());
    }
}
