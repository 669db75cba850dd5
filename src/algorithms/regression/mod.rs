// src/algorithms/regression/mod.rs

//! Regression solvers behind the explainer: weighted least squares for the
//! final attributions, and LARS / Lasso-LARS for optional feature selection.

pub mod lars;
pub mod lasso_lars_ic;
pub mod wlr;

pub use lars::{LarsMethod, LarsPath, LarsPathResult, LarsStep};
pub use lasso_lars_ic::{InformationCriterion, LassoLarsIc, LassoLarsIcResult};
pub use wlr::{WeightedLinearRegression, WlrResults};
