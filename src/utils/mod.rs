// src/utils/mod.rs

pub mod form;
pub mod html;
pub mod jwt;
