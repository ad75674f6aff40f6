//! Broadgrid - Grid-Based Broad-Phase Collision Index

pub mod core;
pub mod grid;
pub mod metrics;
