pub mod circadian;
pub mod color;
pub mod command;
pub mod config;
pub mod gate;
pub mod hass;
pub mod host;
pub mod scheduler;
pub mod switch;
