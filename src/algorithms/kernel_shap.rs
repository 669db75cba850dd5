// src/algorithms/kernel_shap.rs

use crate::algorithms::coalitions::{plan_coalitions, CoalitionPlan};
use crate::algorithms::regression::{
    InformationCriterion, LarsPath, LassoLarsIc, WeightedLinearRegression,
};
use crate::core::{
    Dataset, FeatureImportance, Instance, Prediction, RegularizerType, Result, Saliency,
    ShapConfig, ShapError, ShapResults,
};
use crate::traits::PredictModel;
use crate::utils::linalg;
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Largest varying-feature count for which `2^m - 2` is used as the
/// coalition-space size.
const MAX_ENUMERABLE_FEATURES: usize = 30;
/// `Auto` regularizes when fewer than this share of all coalitions is evaluated.
const AUTO_REGULARIZATION_RATIO: f64 = 0.2;

/// Model-agnostic Shapley value estimator.
///
/// Features missing from a coalition take their values from the background
/// dataset; the model's mean output over the background is the baseline the
/// attributions are measured against.
#[derive(Debug)]
pub struct KernelExplainer<M: PredictModel> {
    model: M,
    config: ShapConfig,
    fnull: Array1<f64>,
    linknull: Array1<f64>,
}

impl<M: PredictModel> KernelExplainer<M> {
    /// Evaluates the model once on the background to establish the baseline.
    pub fn new(model: M, config: ShapConfig) -> Result<Self> {
        let background = config.background();
        let outputs = model.predict(background)?;
        if outputs.nrows() != background.nrows() {
            return Err(ShapError::ModelPredictionError(format!(
                "Model returned {} rows for {} background rows.",
                outputs.nrows(),
                background.nrows()
            )));
        }
        let fnull = outputs.mean_axis(Axis(0)).ok_or_else(|| {
            ShapError::InternalError("Failed to calculate mean of background predictions.".to_string())
        })?;
        let link = config.link();
        let linknull = fnull.mapv(|v| link.apply(v));

        Ok(KernelExplainer {
            model,
            config,
            fnull,
            linknull,
        })
    }

    /// Mean model output over the background, one entry per output.
    pub fn expected_value(&self) -> &Array1<f64> {
        &self.fnull
    }

    pub fn num_features(&self) -> usize {
        self.config.background().ncols()
    }

    pub fn num_outputs(&self) -> usize {
        self.fnull.len()
    }

    pub fn config(&self) -> &ShapConfig {
        &self.config
    }

    /// Attributes every output of `prediction` to its input features.
    pub fn explain(&self, prediction: &Prediction) -> Result<ShapResults> {
        self.validate(prediction)?;

        let instance = &prediction.input;
        let varying = self.varying_features(instance);
        let n_features = self.num_features();
        let n_outputs = self.num_outputs();
        let link = self.config.link();

        let mut scores = Array2::zeros((n_outputs, n_features));
        let mut confidences = Array2::zeros((n_outputs, n_features));

        match varying.as_slice() {
            [] => log::debug!("No feature varies against the background; all attributions are zero."),
            [feature] => {
                log::debug!("Only feature {} varies; attributing the full output change to it.", feature);
                for j in 0..n_outputs {
                    scores[[j, *feature]] = link.apply(prediction.output[j]) - self.linknull[j];
                }
            }
            _ => {
                let solved = self.explain_varying(prediction, &varying)?;
                for (j, (phi, conf)) in solved.into_iter().enumerate() {
                    for (k, &feature) in varying.iter().enumerate() {
                        scores[[j, feature]] = phi[k];
                        confidences[[j, feature]] = conf[k];
                    }
                }
            }
        }

        Ok(self.assemble(prediction, &scores, &confidences))
    }

    /// Explains each prediction in turn.
    pub fn explain_many(&self, predictions: &[Prediction]) -> Result<Vec<ShapResults>> {
        predictions.iter().map(|p| self.explain(p)).collect()
    }

    fn validate(&self, prediction: &Prediction) -> Result<()> {
        if prediction.num_features() != self.num_features() {
            return Err(ShapError::IncompatibleDimensions(format!(
                "Instance to explain has {} features, but the background has {}.",
                prediction.num_features(),
                self.num_features()
            )));
        }
        if prediction.num_outputs() != self.num_outputs() {
            return Err(ShapError::IncompatibleDimensions(format!(
                "Prediction has {} outputs, but the model produces {}.",
                prediction.num_outputs(),
                self.num_outputs()
            )));
        }
        Ok(())
    }

    /// Features whose value differs somewhere between the background and
    /// the instance.
    fn varying_features(&self, instance: &Instance) -> Vec<usize> {
        self.config
            .background()
            .axis_iter(Axis(1))
            .zip(instance.iter())
            .enumerate()
            .filter(|(_, (column, &value))| column.iter().any(|&b| b != value))
            .map(|(i, _)| i)
            .collect()
    }

    fn explain_varying(
        &self,
        prediction: &Prediction,
        varying: &[usize],
    ) -> Result<Vec<(Array1<f64>, Array1<f64>)>> {
        let m = varying.len();
        let max_samples = if m <= MAX_ENUMERABLE_FEATURES {
            (1usize << m) - 2
        } else {
            1usize << MAX_ENUMERABLE_FEATURES
        };
        let mut n_samples = self.config.n_samples().unwrap_or(2 * m + 2048);
        if m <= MAX_ENUMERABLE_FEATURES {
            n_samples = n_samples.min(max_samples);
        }

        let mut rng = match self.config.seed() {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (plan, _) = plan_coalitions(m, n_samples, &mut rng)?;

        let expectations = self.evaluate(&plan, &prediction.input, varying)?;
        let mask = plan.mask_matrix();
        let weights = plan.weights();

        let regularizer = match self.config.regularizer() {
            RegularizerType::Auto
                if (plan.len() as f64 / max_samples as f64) < AUTO_REGULARIZATION_RATIO =>
            {
                RegularizerType::Aic
            }
            RegularizerType::Auto => RegularizerType::None,
            other => other,
        };
        log::debug!(
            "Explaining {} varying features with {} coalitions, regularizer {:?}, parallel {}",
            m,
            plan.len(),
            regularizer,
            self.config.executor().is_parallel()
        );

        let link = self.config.link();
        let alpha = 1.0 - self.config.confidence();
        self.config.executor().try_map(self.num_outputs(), |j| {
            let diff = link.apply(prediction.output[j]) - self.linknull[j];
            solve_output(
                &mask.view(),
                &expectations.column(j),
                &weights.view(),
                diff,
                regularizer,
                alpha,
            )
        })
    }

    /// Expected linked model output of every coalition, relative to the
    /// baseline: one row per coalition, one column per output.
    fn evaluate(
        &self,
        plan: &CoalitionPlan,
        instance: &Instance,
        varying: &[usize],
    ) -> Result<Array2<f64>> {
        let background = self.config.background();
        let n_background = background.nrows();
        let batch_size = self.config.batch_size();
        let coalitions = plan.coalitions();
        let n_batches = coalitions.len().div_ceil(batch_size);
        let link = self.config.link();

        let batches = self.config.executor().try_map(n_batches, |b| {
            let batch = &coalitions[b * batch_size..((b + 1) * batch_size).min(coalitions.len())];

            let mut synthetic = Dataset::zeros((batch.len() * n_background, background.ncols()));
            for (c, coalition) in batch.iter().enumerate() {
                let mut block = synthetic.slice_mut(s![c * n_background..(c + 1) * n_background, ..]);
                block.assign(background);
                for (k, &feature) in varying.iter().enumerate() {
                    if coalition.mask[k] {
                        block.column_mut(feature).fill(instance[feature]);
                    }
                }
            }

            let outputs = self.model.predict(&synthetic)?;
            if outputs.dim() != (synthetic.nrows(), self.num_outputs()) {
                return Err(ShapError::ModelPredictionError(format!(
                    "Model returned a {:?} output for {} synthetic rows, expected {} outputs per row.",
                    outputs.dim(),
                    synthetic.nrows(),
                    self.num_outputs()
                )));
            }

            (0..batch.len())
                .map(|c| -> Result<Array1<f64>> {
                    let mean = outputs
                        .slice(s![c * n_background..(c + 1) * n_background, ..])
                        .mean_axis(Axis(0))
                        .ok_or_else(|| {
                            ShapError::InternalError("Empty synthetic block.".to_string())
                        })?;
                    Ok(mean
                        .iter()
                        .zip(self.linknull.iter())
                        .map(|(&v, &null)| link.apply(v) - null)
                        .collect::<Array1<f64>>())
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let rows: Vec<Array1<f64>> = batches.into_iter().flatten().collect();
        linalg::matrix_from_rows(&rows)
    }

    fn assemble(
        &self,
        prediction: &Prediction,
        scores: &Array2<f64>,
        confidences: &Array2<f64>,
    ) -> ShapResults {
        let saliencies = (0..self.num_outputs())
            .map(|j| Saliency {
                output_name: format!("output_{}", j),
                output_value: prediction.output[j],
                per_feature: (0..self.num_features())
                    .map(|i| FeatureImportance {
                        name: self.config.feature_name(i),
                        value: prediction.input[i],
                        score: scores[[j, i]],
                        confidence: confidences[[j, i]],
                    })
                    .collect(),
            })
            .collect();

        ShapResults {
            saliencies,
            fnull: self.fnull.to_vec(),
        }
    }
}

/// Solves one output dimension: optional feature selection, then a weighted
/// regression with the attributions constrained to sum to `diff`.
///
/// Returns scores and confidence radii over the varying features.
fn solve_output(
    mask: &ArrayView2<f64>,
    expectations: &ArrayView1<f64>,
    weights: &ArrayView1<f64>,
    diff: f64,
    regularizer: RegularizerType,
    alpha: f64,
) -> Result<(Array1<f64>, Array1<f64>)> {
    let m = mask.ncols();
    let mut phi = Array1::zeros(m);
    let mut conf = Array1::zeros(m);

    let augmented = || augmented_design(mask, expectations, weights, diff);
    let mut selected: Vec<usize> = match regularizer {
        RegularizerType::None | RegularizerType::Auto => (0..m).collect(),
        RegularizerType::Aic | RegularizerType::Bic => {
            let criterion = if regularizer == RegularizerType::Aic {
                InformationCriterion::Aic
            } else {
                InformationCriterion::Bic
            };
            let (x, y) = augmented()?;
            LassoLarsIc::new(criterion).fit(&x.view(), &y.view())?.selected()
        }
        RegularizerType::TopNFeatures(n) => {
            let (x, y) = augmented()?;
            LarsPath::lar(n).fit(&x.view(), &y.view())?.active
        }
    };
    selected.sort_unstable();

    let Some((&last, rest)) = selected.split_last() else {
        return Ok((phi, conf));
    };
    if rest.is_empty() {
        phi[last] = diff;
        return Ok((phi, conf));
    }

    // eliminate the last selected feature through the sum constraint
    let last_column = mask.column(last);
    let adjusted = expectations - &last_column.mapv(|v| v * diff);
    let mut design = Array2::zeros((mask.nrows(), rest.len()));
    for (k, &feature) in rest.iter().enumerate() {
        design
            .column_mut(k)
            .assign(&(&mask.column(feature) - &last_column));
    }

    let fit = WeightedLinearRegression::new()
        .intercept(false)
        .fit(&design.view(), &adjusted.view(), weights)?;
    let radii = fit.conf(alpha)?;

    for (k, &feature) in rest.iter().enumerate() {
        phi[feature] = fit.coefficients[k];
        conf[feature] = radii[k];
    }
    phi[last] = diff - fit.coefficients.sum();
    conf[last] = radii.mapv(|r| r * r).sum().sqrt();
    Ok((phi, conf))
}

/// Design for feature selection: every coalition appears once as is and once
/// shifted by `-1` with target `ey - diff`, weighted so that the sum
/// constraint is honoured softly. Rows are pre-multiplied by the square root
/// of their weight.
fn augmented_design(
    mask: &ArrayView2<f64>,
    expectations: &ArrayView1<f64>,
    weights: &ArrayView1<f64>,
    diff: f64,
) -> Result<(Array2<f64>, Array1<f64>)> {
    let m = mask.ncols() as f64;
    let sizes = linalg::row_sum(mask);

    let w_present = weights * &sizes.mapv(|s| m - s);
    let w_absent = weights * &sizes;
    let sqrt_w = ndarray::concatenate(Axis(0), &[w_present.view(), w_absent.view()])?.mapv(f64::sqrt);

    let shifted_mask = linalg::map_elements(mask, |v| v - 1.0);
    let x = ndarray::concatenate(Axis(0), &[mask.view(), shifted_mask.view()])?;
    let shifted_target = expectations.mapv(|v| v - diff);
    let y = ndarray::concatenate(Axis(0), &[expectations.view(), shifted_target.view()])?;

    let x = &x * &sqrt_w.view().insert_axis(Axis(1));
    let y = y * &sqrt_w;
    Ok((x, y))
}
