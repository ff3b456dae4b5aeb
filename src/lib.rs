#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::unnecessary_literal_bound,
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

pub mod audit;
pub mod canon;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod intent;
pub mod observability;
pub mod pipeline;
pub mod policy;
pub mod replay;
pub mod state;

pub use config::Config;
pub use error::{GateError, Result, StopReason};
