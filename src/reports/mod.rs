pub mod billing;
pub mod client;
pub mod payload;
pub mod presets;
pub mod runner;
