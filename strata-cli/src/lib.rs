//! Strata CLI library: argument surface, input parsers, and logging
//! bootstrap for the clustering engine.

pub mod cli;
pub mod logging;
pub mod parsers;
