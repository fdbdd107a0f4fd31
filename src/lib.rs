pub mod commands;
pub mod orchestration;
pub mod policy;
pub mod reports;
pub mod roster;
pub mod shared;
pub mod store;
