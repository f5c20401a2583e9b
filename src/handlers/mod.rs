// src/handlers/mod.rs

pub mod player;
