pub mod alert;
pub mod auth;
pub mod config;
pub mod slots;
pub mod sync;
