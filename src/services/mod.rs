// src/services/mod.rs

// Core services organized by domain
pub mod core;
