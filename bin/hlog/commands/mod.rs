//! hlog subcommands

pub mod tail;
pub mod urls;
