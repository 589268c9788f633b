// src/services/core/mod.rs

pub mod admin;
pub mod calendar;
pub mod infrastructure;
