//! Customer profitability engine: RFM scoring, CLV forecasting and
//! uplift-based campaign targeting as one batch pipeline.

pub mod artifacts;
pub mod bgnbd_model;
pub mod cancel;
pub mod clv_forecaster;
pub mod config;
pub mod customer_table;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod event;
pub mod gamma_gamma_model;
pub mod input;
pub mod logistic_model;
pub mod model_blob;
pub mod optimizer;
pub mod quantile;
pub mod rfm_aggregator;
pub mod rng;
pub mod special_fn;
pub mod store;
pub mod summary;
pub mod synthetic;
pub mod targeting_ranker;
pub mod types;
pub mod uplift_modeler;
