//! API request handlers

pub mod containers;
pub mod health;
