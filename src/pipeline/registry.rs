//! Environment registry.
//!
//! Holds every declared environment, validated and immutable for the
//! duration of a run.

use super::environment::Environment;
use super::errors::ValidationError;
use super::types::Validate;
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable collection of environments in declaration order
#[derive(Debug, Clone, Default)]
pub struct EnvironmentRegistry {
    environments: Vec<Arc<Environment>>,
    index: HashMap<String, usize>,
}

impl EnvironmentRegistry {
    /// Builds a registry, validating every environment
    pub fn new(environments: Vec<Environment>) -> Result<Self, ValidationError> {
        let mut registry = Self::default();

        for env in environments {
            env.validate()?;
            if registry.index.contains_key(&env.name) {
                return Err(ValidationError::DuplicateEnvironment(env.name));
            }
            registry
                .index
                .insert(env.name.clone(), registry.environments.len());
            registry.environments.push(Arc::new(env));
        }

        Ok(registry)
    }

    /// Looks up an environment by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Environment>> {
        self.index
            .get(name)
            .map(|&i| Arc::clone(&self.environments[i]))
    }

    /// Returns true if an environment with this name exists
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Resolves several names, failing on the first unknown one
    pub fn resolve<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<Vec<Arc<Environment>>, ValidationError> {
        names
            .iter()
            .map(|name| {
                self.get(name.as_ref())
                    .ok_or_else(|| ValidationError::UnknownEnvironment {
                        job: "<command line>".to_string(),
                        env: name.as_ref().to_string(),
                    })
            })
            .collect()
    }

    /// Iterates over environments in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Environment>> {
        self.environments.iter()
    }

    /// Returns the environment names in declaration order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.environments.iter().map(|e| e.name.as_str()).collect()
    }

    /// Returns the number of environments
    #[must_use]
    pub fn len(&self) -> usize {
        self.environments.len()
    }

    /// Returns true if no environments are declared
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str) -> Environment {
        Environment::new(name, vec!["true".to_string()])
    }

    #[test]
    fn test_registry_preserves_order() {
        let registry =
            EnvironmentRegistry::new(vec![env("lint"), env("py38"), env("docs")]).unwrap();
        assert_eq!(registry.names(), vec!["lint", "py38", "docs"]);
        assert_eq!(registry.len(), 3);
        assert!(registry.contains("py38"));
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let err = EnvironmentRegistry::new(vec![env("lint"), env("lint")]).unwrap_err();
        assert_eq!(err, ValidationError::DuplicateEnvironment("lint".to_string()));
    }

    #[test]
    fn test_registry_validates_environments() {
        let bad = Environment::new("bad name", vec!["true".to_string()]);
        assert!(EnvironmentRegistry::new(vec![bad]).is_err());
    }

    #[test]
    fn test_registry_resolve() {
        let registry = EnvironmentRegistry::new(vec![env("lint"), env("py38")]).unwrap();
        let resolved = registry.resolve(&["py38", "lint"]).unwrap();
        assert_eq!(resolved[0].name, "py38");
        assert_eq!(resolved[1].name, "lint");

        let err = registry.resolve(&["py39"]).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownEnvironment { env, .. } if env == "py39"));
    }
}
