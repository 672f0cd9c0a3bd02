//! Route modules for the upload server

pub mod health;
pub mod settings;
pub mod tus;
