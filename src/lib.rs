pub mod cache;
pub mod config;
pub mod db;
pub mod logging;
pub mod services;
pub mod state;

pub use state::MasteryCore;
