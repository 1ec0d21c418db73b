//! Infrastructure layer: loan persistence, action dispatch, configuration.

pub mod action_dispatcher;
pub mod config;
pub mod loan_store;
