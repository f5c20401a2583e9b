// src/services/mod.rs

pub mod grading;
pub mod player;
pub mod reconcile;
