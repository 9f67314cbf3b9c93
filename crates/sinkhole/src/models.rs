//! Enriching/context-bearing wrappers over the workflow models
//! from [`actions_models`].

pub(crate) mod workflow;
