// src/models/mod.rs

pub mod answer;
pub mod assignment;
pub mod attempt;
pub mod question;
pub mod test;
