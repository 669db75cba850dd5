// src/core/data.rs
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a single data instance (a row of features).
pub type Instance = Array1<f64>;

/// Represents a dataset (multiple instances, e.g., background data).
pub type Dataset = Array2<f64>;

/// An explained instance: the model input together with the output the model
/// produced for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub input: Instance,
    pub output: Array1<f64>,
}

impl Prediction {
    pub fn new(input: impl Into<Instance>, output: impl Into<Array1<f64>>) -> Self {
        Prediction {
            input: input.into(),
            output: output.into(),
        }
    }

    pub fn num_features(&self) -> usize {
        self.input.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.output.len()
    }
}

/// Attribution of one feature towards one model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub name: String,
    /// The feature's value in the explained instance.
    pub value: f64,
    /// The Shapley value estimate.
    pub score: f64,
    /// Half-width of the confidence interval around `score`.
    pub confidence: f64,
}

/// All feature attributions for one output dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Saliency {
    pub output_name: String,
    pub output_value: f64,
    pub per_feature: Vec<FeatureImportance>,
}

impl Saliency {
    pub fn scores(&self) -> Vec<f64> {
        self.per_feature.iter().map(|f| f.score).collect()
    }

    pub fn confidences(&self) -> Vec<f64> {
        self.per_feature.iter().map(|f| f.confidence).collect()
    }

    pub fn total_score(&self) -> f64 {
        self.per_feature.iter().map(|f| f.score).sum()
    }
}

/// The output of a Kernel SHAP explanation: one saliency per model output plus
/// the background's mean output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapResults {
    pub saliencies: Vec<Saliency>,
    /// Mean model output over the background dataset, one entry per output.
    pub fnull: Vec<f64>,
}

impl ShapResults {
    pub fn num_outputs(&self) -> usize {
        self.saliencies.len()
    }

    pub fn scores(&self, output: usize) -> Option<Vec<f64>> {
        self.saliencies.get(output).map(Saliency::scores)
    }

    pub fn confidences(&self, output: usize) -> Option<Vec<f64>> {
        self.saliencies.get(output).map(Saliency::confidences)
    }
}

impl fmt::Display for ShapResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SHAP Results:")?;
        for (saliency, fnull) in self.saliencies.iter().zip(self.fnull.iter()) {
            writeln!(
                f,
                "  {}: value {:.4}, baseline (fnull) {:.4}",
                saliency.output_name, saliency.output_value, fnull
            )?;
            writeln!(
                f,
                "    {:<20} {:>12} {:>12} {:>12}",
                "Feature", "Value", "SHAP", "+/-"
            )?;
            writeln!(f, "    {}", "-".repeat(59))?;
            for fi in &saliency.per_feature {
                writeln!(
                    f,
                    "    {:<20} {:>12.4} {:>12.6} {:>12.6}",
                    fi.name, fi.value, fi.score, fi.confidence
                )?;
            }
            writeln!(f, "    {}", "-".repeat(59))?;
            writeln!(
                f,
                "    {:<20} {:>12} {:>12.6}",
                "fnull + SHAP", "",
                fnull + saliency.total_score()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample_results() -> ShapResults {
        ShapResults {
            saliencies: vec![Saliency {
                output_name: "output_0".to_string(),
                output_value: 3.0,
                per_feature: vec![
                    FeatureImportance {
                        name: "age".to_string(),
                        value: 42.0,
                        score: 1.5,
                        confidence: 0.1,
                    },
                    FeatureImportance {
                        name: "income".to_string(),
                        value: 10.0,
                        score: 0.5,
                        confidence: 0.2,
                    },
                ],
            }],
            fnull: vec![1.0],
        }
    }

    #[test]
    fn prediction_shapes() {
        let p = Prediction::new(array![1.0, 2.0, 3.0], array![0.5]);
        assert_eq!(p.num_features(), 3);
        assert_eq!(p.num_outputs(), 1);
    }

    #[test]
    fn accessors() {
        let results = sample_results();
        assert_eq!(results.scores(0), Some(vec![1.5, 0.5]));
        assert_eq!(results.confidences(0), Some(vec![0.1, 0.2]));
        assert_eq!(results.scores(1), None);
        assert_eq!(results.saliencies[0].total_score(), 2.0);
    }

    #[test]
    fn display_lists_every_feature() {
        let rendered = sample_results().to_string();
        assert!(rendered.contains("age"));
        assert!(rendered.contains("income"));
        assert!(rendered.contains("fnull + SHAP"));
    }

    #[test]
    fn serde_round_trip() {
        let results = sample_results();
        let json = serde_json::to_string(&results).unwrap();
        let back: ShapResults = serde_json::from_str(&json).unwrap();
        assert_eq!(results, back);
    }
}
