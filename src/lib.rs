#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::needless_pass_by_value,
    clippy::return_self_not_must_use,
    clippy::single_match_else,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

pub mod channels;
pub mod config;
pub mod dispatch;
pub mod gateway;
pub mod intake;
pub mod pagination;
pub mod payment;
pub mod reaper;
pub mod registry;
pub mod sanitize;
pub mod security;
pub mod worker;

pub use config::Config;
