// src/core/config.rs
use serde::{Deserialize, Serialize};

use crate::core::{Dataset, Result, ShapError};
use crate::utils::executor::Executor;

/// Coalitions stacked into a single model call unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 20;
pub const DEFAULT_CONFIDENCE: f64 = 0.95;
/// Background sizes above this are accepted but slow.
pub const LARGE_BACKGROUND_ROWS: usize = 100;

/// Transform applied to model outputs before attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Link {
    Identity,
    /// `ln(x / (1 - x))`, for models that output probabilities.
    Logit,
}

impl Link {
    #[inline]
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Link::Identity => x,
            Link::Logit => (x / (1.0 - x)).ln(),
        }
    }
}

/// Feature-selection policy run before the final weighted regression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegularizerType {
    /// `Aic` when fewer than 20% of all coalitions were evaluated, else `None`.
    Auto,
    Aic,
    Bic,
    /// Keep the first `n` features entering the LARS path.
    TopNFeatures(usize),
    None,
}

/// Validated explainer configuration. Build one with [`ShapConfig::builder`].
#[derive(Debug, Clone)]
pub struct ShapConfig {
    link: Link,
    background: Dataset,
    executor: Executor,
    n_samples: Option<usize>,
    batch_size: usize,
    confidence: f64,
    regularizer: RegularizerType,
    seed: Option<u64>,
    feature_names: Option<Vec<String>>,
}

impl ShapConfig {
    pub fn builder() -> ShapConfigBuilder {
        ShapConfigBuilder::default()
    }

    pub fn link(&self) -> Link {
        self.link
    }

    pub fn background(&self) -> &Dataset {
        &self.background
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn n_samples(&self) -> Option<usize> {
        self.n_samples
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn regularizer(&self) -> RegularizerType {
        self.regularizer
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn feature_name(&self, index: usize) -> String {
        self.feature_names
            .as_ref()
            .and_then(|names| names.get(index).cloned())
            .unwrap_or_else(|| format!("feature_{}", index))
    }
}

/// Builder for [`ShapConfig`]. `link` and `background` are required.
#[derive(Debug, Default)]
pub struct ShapConfigBuilder {
    link: Option<Link>,
    background: Option<Dataset>,
    executor: Executor,
    n_samples: Option<usize>,
    batch_size: Option<usize>,
    confidence: Option<f64>,
    regularizer: Option<RegularizerType>,
    seed: Option<u64>,
    feature_names: Option<Vec<String>>,
}

impl ShapConfigBuilder {
    pub fn link(mut self, link: Link) -> Self {
        self.link = Some(link);
        self
    }

    pub fn background(mut self, background: Dataset) -> Self {
        self.background = Some(background);
        self
    }

    pub fn executor(mut self, executor: Executor) -> Self {
        self.executor = executor;
        self
    }

    pub fn n_samples(mut self, n_samples: usize) -> Self {
        self.n_samples = Some(n_samples);
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn regularizer(mut self, regularizer: RegularizerType) -> Self {
        self.regularizer = Some(regularizer);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn feature_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.feature_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn build(self) -> Result<ShapConfig> {
        let link = self
            .link
            .ok_or_else(|| ShapError::MissingValue("a link function is required".to_string()))?;
        let background = self
            .background
            .ok_or_else(|| ShapError::MissingValue("a background dataset is required".to_string()))?;

        if background.nrows() == 0 || background.ncols() == 0 {
            return Err(ShapError::InvalidConfiguration(format!(
                "Background data cannot be empty (got {}x{}).",
                background.nrows(),
                background.ncols()
            )));
        }
        if background.iter().any(|v| !v.is_finite()) {
            return Err(ShapError::InvalidConfiguration(
                "Background data contains non-finite values.".to_string(),
            ));
        }
        if background.nrows() > LARGE_BACKGROUND_ROWS {
            log::warn!(
                "Background has {} rows; more than {} rows slows every explanation down considerably. \
                 Consider summarizing it with a BackgroundSelector.",
                background.nrows(),
                LARGE_BACKGROUND_ROWS
            );
        }

        let confidence = self.confidence.unwrap_or(DEFAULT_CONFIDENCE);
        if !(confidence > 0.0 && confidence < 1.0) {
            return Err(ShapError::InvalidConfiguration(format!(
                "confidence must lie in (0, 1), got {}",
                confidence
            )));
        }

        let batch_size = self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            return Err(ShapError::InvalidConfiguration(
                "batch_size must be at least 1".to_string(),
            ));
        }

        if self.n_samples == Some(0) {
            return Err(ShapError::InvalidConfiguration(
                "n_samples must be at least 1".to_string(),
            ));
        }

        let regularizer = self.regularizer.unwrap_or(RegularizerType::Auto);
        if regularizer == RegularizerType::TopNFeatures(0) {
            return Err(ShapError::InvalidConfiguration(
                "TopNFeatures requires at least one feature".to_string(),
            ));
        }

        if let Some(names) = &self.feature_names {
            if names.len() != background.ncols() {
                return Err(ShapError::InvalidConfiguration(format!(
                    "{} feature names given for {} background columns",
                    names.len(),
                    background.ncols()
                )));
            }
        }

        Ok(ShapConfig {
            link,
            background,
            executor: self.executor,
            n_samples: self.n_samples,
            batch_size,
            confidence,
            regularizer,
            seed: self.seed,
            feature_names: self.feature_names,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn background() -> Dataset {
        array![[0.0, 1.0], [1.0, 0.0]]
    }

    #[test]
    fn defaults() {
        let config = ShapConfig::builder()
            .link(Link::Identity)
            .background(background())
            .build()
            .unwrap();
        assert_eq!(config.batch_size(), DEFAULT_BATCH_SIZE);
        assert_eq!(config.regularizer(), RegularizerType::Auto);
        assert_abs_diff_eq!(config.confidence(), 0.95);
        assert_eq!(config.n_samples(), None);
        assert_eq!(config.feature_name(1), "feature_1");
    }

    #[test]
    fn missing_link_or_background() {
        let err = ShapConfig::builder().background(background()).build().unwrap_err();
        assert!(matches!(err, ShapError::MissingValue(_)));
        let err = ShapConfig::builder().link(Link::Logit).build().unwrap_err();
        assert!(matches!(err, ShapError::MissingValue(_)));
    }

    #[test]
    fn rejects_empty_background() {
        let err = ShapConfig::builder()
            .link(Link::Identity)
            .background(Dataset::zeros((0, 3)))
            .build()
            .unwrap_err();
        assert!(matches!(err, ShapError::InvalidConfiguration(_)));
    }

    #[test]
    fn rejects_bad_parameters() {
        let base = || ShapConfig::builder().link(Link::Identity).background(background());
        assert!(base().regularizer(RegularizerType::TopNFeatures(0)).build().is_err());
        assert!(base().confidence(1.0).build().is_err());
        assert!(base().confidence(0.0).build().is_err());
        assert!(base().batch_size(0).build().is_err());
        assert!(base().n_samples(0).build().is_err());
        assert!(base().feature_names(["only_one"]).build().is_err());
        assert!(base().regularizer(RegularizerType::TopNFeatures(1)).build().is_ok());
    }

    #[test]
    fn named_features() {
        let config = ShapConfig::builder()
            .link(Link::Identity)
            .background(background())
            .feature_names(["age", "income"])
            .build()
            .unwrap();
        assert_eq!(config.feature_name(0), "age");
        assert_eq!(config.feature_name(1), "income");
    }

    #[test]
    fn link_functions() {
        assert_abs_diff_eq!(Link::Identity.apply(0.3), 0.3);
        assert_abs_diff_eq!(Link::Logit.apply(0.5), 0.0);
        assert_abs_diff_eq!(Link::Logit.apply(0.75), 3.0_f64.ln(), epsilon = 1e-12);
    }
}
