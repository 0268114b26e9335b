pub mod app;
pub mod check;
pub mod commands;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod inspect;
pub mod output;
pub mod runtime;
pub mod serve;
pub mod update;

pub use app::{exit_code, run};
