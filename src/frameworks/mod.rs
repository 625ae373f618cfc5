// Frameworks: process bootstrap, environment config and the headless console.

pub mod client;
pub mod config;
pub mod console;
