//! Command handlers

pub mod checkpoints;
pub mod clusters;
pub mod costs;
pub mod trial;
