//! Terminal front end

mod cli;

pub use cli::{format_report, Args, Cli};
