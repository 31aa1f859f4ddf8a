//! Command-line interface orchestration for the strata clustering engine.

mod commands;

pub use commands::{
    BoundArg, Cli, CliError, ClusterCommand, Command, ExecutionSummary, FormatArg, MarginArg,
    ReductionArg, StyleArg, render_summary, run_cli,
};
