//! Inference output

use serde::Serialize;

/// Adapted inverse metric, one entry per chain
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "values", rename_all = "lowercase")]
pub enum MetricOutput {
    /// `n_free_params` diagonal entries per chain
    Diagonal(Vec<Vec<f64>>),
    /// An `n_free_params x n_free_params` matrix per chain
    Dense(Vec<Vec<Vec<f64>>>),
}

impl MetricOutput {
    pub fn num_chains(&self) -> usize {
        match self {
            MetricOutput::Diagonal(chains) => chains.len(),
            MetricOutput::Dense(chains) => chains.len(),
        }
    }
}

/// Draws returned by sampling or pathfinder
///
/// `draws[j]` holds every draw of `param_names[j]`, in draw order. The
/// diagnostic variables come first, then the model's parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StanDraws {
    pub param_names: Vec<String>,
    pub draws: Vec<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<MetricOutput>,
}

impl StanDraws {
    /// Every draw of the variable called `name`
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.param_names
            .iter()
            .position(|n| n == name)
            .map(|index| self.draws[index].as_slice())
    }

    /// Sample mean of the variable called `name`
    pub fn mean(&self, name: &str) -> Option<f64> {
        let values = self.get(name)?;
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }

    pub fn num_draws(&self) -> usize {
        self.draws.first().map_or(0, Vec::len)
    }

    pub fn num_variables(&self) -> usize {
        self.param_names.len()
    }
}
