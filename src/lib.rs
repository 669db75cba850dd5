// src/lib.rs

//! `kernel_shap` computes Kernel SHAP (SHapley Additive exPlanations)
//! attributions for black-box models, together with a confidence radius for
//! every attribution.
//!
//! A [`KernelExplainer`] wraps any [`PredictModel`] and a validated
//! [`ShapConfig`]. Explaining a [`Prediction`] samples feature coalitions,
//! evaluates the model on synthetic rows built from the background dataset,
//! and solves a constrained weighted regression per model output:
//!
//! ```no_run
//! use kernel_shap::{Dataset, KernelExplainer, Link, Prediction, Result, ShapConfig};
//! use ndarray::{array, Array2, Axis};
//!
//! fn main() -> Result<()> {
//!     let model = |x: &Dataset| -> Result<Array2<f64>> {
//!         Ok(x.sum_axis(Axis(1)).insert_axis(Axis(1)))
//!     };
//!     let config = ShapConfig::builder()
//!         .link(Link::Identity)
//!         .background(array![[0.0, 0.0, 0.0], [1.0, 2.0, 3.0]])
//!         .build()?;
//!     let explainer = KernelExplainer::new(model, config)?;
//!     let results = explainer.explain(&Prediction::new(array![2.0, 2.0, 2.0], array![6.0]))?;
//!     println!("{}", results);
//!     Ok(())
//! }
//! ```

pub mod algorithms;
pub mod core;
pub mod traits;
pub mod utils;

pub use crate::algorithms::KernelExplainer;
pub use crate::core::{
    Dataset, FeatureImportance, Instance, Link, Prediction, RegularizerType, Result, Saliency,
    ShapConfig, ShapConfigBuilder, ShapError, ShapResults,
};
pub use crate::traits::PredictModel;
pub use crate::utils::{BackgroundSelector, Executor};
