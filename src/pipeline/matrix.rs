//! Matrix expansion for parallel job execution.
//!
//! A matrix is a list of named axes. Expansion is the cartesian product of
//! their values, minus explicit exclusions, and is a pure function of the
//! declaration: the same axes always yield the same cells in the same
//! order.

use super::errors::ValidationError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Matrix configuration for parallel execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MatrixConfig {
    /// Matrix axes defining dimensions of parallel execution
    pub axes: Vec<MatrixAxis>,
    /// Exclusions (combinations to skip)
    #[serde(default, deserialize_with = "scalar_maps")]
    pub exclude: Vec<BTreeMap<String, String>>,
    /// Cell name template, e.g. `"{os}-py{version}"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_template: Option<String>,
}

/// A single axis of the matrix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatrixAxis {
    /// Simple values
    Values {
        /// Axis name
        name: String,
        /// Possible values
        #[serde(deserialize_with = "scalar_values")]
        values: Vec<String>,
    },
    /// Numeric range
    Range {
        /// Axis name
        name: String,
        /// Start value (inclusive)
        start: i64,
        /// End value (inclusive)
        end: i64,
        /// Step value
        #[serde(default = "default_step")]
        step: i64,
    },
}

fn default_step() -> i64 {
    1
}

impl MatrixAxis {
    /// Creates a value axis
    pub fn values<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Values {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the axis name
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Values { name, .. } | Self::Range { name, .. } => name,
        }
    }

    /// Returns the concrete values of this axis
    #[must_use]
    pub fn resolved_values(&self) -> Vec<String> {
        match self {
            Self::Values { values, .. } => values.clone(),
            Self::Range {
                start, end, step, ..
            } => {
                let step = usize::try_from(*step).unwrap_or(1).max(1);
                (*start..=*end).step_by(step).map(|v| v.to_string()).collect()
            }
        }
    }
}

/// One concrete combination of axis values
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct MatrixCell {
    /// Cell index within its job
    pub index: usize,
    /// Axis values in axis declaration order
    pub values: Vec<(String, String)>,
    /// Cell-specific name
    pub name: String,
}

impl MatrixCell {
    /// The single cell of a job without a matrix
    #[must_use]
    pub fn single() -> Self {
        Self {
            index: 0,
            values: Vec::new(),
            name: "default".to_string(),
        }
    }

    /// Gets the value of an axis
    #[must_use]
    pub fn get(&self, axis: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == axis)
            .map(|(_, v)| v.as_str())
    }

    /// Variables exported to commands, one `MATRIX_<AXIS>` per axis
    #[must_use]
    pub fn env_vars(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|(k, v)| {
                let key = k
                    .chars()
                    .map(|c| {
                        if c.is_ascii_alphanumeric() {
                            c.to_ascii_uppercase()
                        } else {
                            '_'
                        }
                    })
                    .collect::<String>();
                (format!("MATRIX_{key}"), v.clone())
            })
            .collect()
    }

    /// Variables keyed by bare axis name, for `${axis}` templates
    #[must_use]
    pub fn template_vars(&self) -> BTreeMap<String, String> {
        self.values.iter().cloned().collect()
    }

    /// A file-name safe rendering of the cell name
    #[must_use]
    pub fn slug(&self) -> String {
        self.name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl MatrixConfig {
    /// Creates a matrix from axes with no exclusions
    #[must_use]
    pub fn new(axes: Vec<MatrixAxis>) -> Self {
        Self {
            axes,
            exclude: Vec::new(),
            name_template: None,
        }
    }

    /// Adds an exclusion entry
    #[must_use]
    pub fn excluding<I, K, V>(mut self, entry: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.exclude
            .push(entry.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    /// Expands the axes into concrete cells
    #[must_use]
    pub fn expand(&self) -> Vec<MatrixCell> {
        if self.axes.is_empty() {
            return Vec::new();
        }

        let axes: Vec<(String, Vec<String>)> = self
            .axes
            .iter()
            .map(|axis| (axis.name().to_string(), axis.resolved_values()))
            .collect();

        let mut combinations = Vec::new();
        self.cartesian_product(&axes, 0, &mut Vec::new(), &mut combinations);

        combinations
            .into_iter()
            .enumerate()
            .map(|(index, values)| {
                let name = self.cell_name(&values, index);
                MatrixCell {
                    index,
                    values,
                    name,
                }
            })
            .collect()
    }

    /// Returns the number of cells that will be generated
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.expand().len()
    }

    /// Checks if the matrix configuration is valid
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidMatrix { reason };

        if self.axes.is_empty() {
            return Err(invalid("matrix must have at least one axis".to_string()));
        }

        let mut names = HashSet::new();
        for axis in &self.axes {
            let name = axis.name();
            if name.is_empty() {
                return Err(invalid("axis name cannot be empty".to_string()));
            }
            if !names.insert(name) {
                return Err(invalid(format!("axis '{name}' is declared more than once")));
            }
            match axis {
                MatrixAxis::Values { values, .. } => {
                    if values.is_empty() {
                        return Err(invalid(format!(
                            "axis '{name}' must have at least one value"
                        )));
                    }
                    let unique: HashSet<_> = values.iter().collect();
                    if unique.len() != values.len() {
                        return Err(invalid(format!("axis '{name}' has duplicate values")));
                    }
                }
                MatrixAxis::Range {
                    start, end, step, ..
                } => {
                    if *step <= 0 {
                        return Err(invalid(format!("axis '{name}' step must be positive")));
                    }
                    if start > end {
                        return Err(invalid(format!("axis '{name}' start must be <= end")));
                    }
                }
            }
        }

        for entry in &self.exclude {
            if let Some(unknown) = entry.keys().find(|k| !names.contains(k.as_str())) {
                return Err(invalid(format!("exclude references unknown axis '{unknown}'")));
            }
        }

        if self.cell_count() == 0 {
            return Err(invalid("exclusions remove every combination".to_string()));
        }

        Ok(())
    }

    fn cartesian_product(
        &self,
        axes: &[(String, Vec<String>)],
        index: usize,
        current: &mut Vec<(String, String)>,
        results: &mut Vec<Vec<(String, String)>>,
    ) {
        if index == axes.len() {
            if !self.is_excluded(current) {
                results.push(current.clone());
            }
            return;
        }

        let (name, values) = &axes[index];
        for value in values {
            current.push((name.clone(), value.clone()));
            self.cartesian_product(axes, index + 1, current, results);
            current.pop();
        }
    }

    fn is_excluded(&self, combo: &[(String, String)]) -> bool {
        self.exclude.iter().any(|exclusion| {
            exclusion.iter().all(|(key, value)| {
                combo.iter().any(|(k, v)| k == key && v == value)
            })
        })
    }

    fn cell_name(&self, combo: &[(String, String)], index: usize) -> String {
        if let Some(template) = &self.name_template {
            let mut name = template.replace("{idx}", &index.to_string());
            for (k, v) in combo {
                name = name.replace(&format!("{{{k}}}"), v);
            }
            name
        } else {
            combo
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(",")
        }
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn scalar_values<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Vec::<serde_yaml::Value>::deserialize(deserializer)?
        .iter()
        .map(|v| {
            scalar_to_string(v).ok_or_else(|| D::Error::custom("matrix values must be scalars"))
        })
        .collect()
}

fn scalar_maps<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<BTreeMap<String, String>>, D::Error> {
    Vec::<BTreeMap<String, serde_yaml::Value>>::deserialize(deserializer)?
        .into_iter()
        .map(|entry| {
            entry
                .into_iter()
                .map(|(k, v)| {
                    scalar_to_string(&v)
                        .map(|v| (k, v))
                        .ok_or_else(|| D::Error::custom("exclude values must be scalars"))
                })
                .collect()
        })
        .collect()
}
