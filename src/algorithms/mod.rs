// src/algorithms/mod.rs

pub mod coalitions;
pub mod kernel_shap;
pub mod regression;

pub use kernel_shap::KernelExplainer;
