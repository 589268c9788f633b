// src/services/core/admin/mod.rs

pub mod admin_state;

pub use admin_state::{AdminGate, AdminManager, AdminState};
