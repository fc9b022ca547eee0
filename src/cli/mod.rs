//! CLI argument parsing for advlock.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// advlock: POSIX advisory file locks shared through a lock namespace.
///
/// Locks taken here are visible to every advlock process using the same
/// namespace root, so two shells can contend for the same byte range.
#[derive(Parser, Debug)]
#[command(name = "advlock")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// YAML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for advlock.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Acquire a lock, hold it, then release it.
    ///
    /// The lock is held until Enter is pressed, or for `--hold-ms`
    /// milliseconds when given.
    Lock(LockArgs),

    /// Report the first lock that would block a request (F_GETLK).
    Test(TestArgs),

    /// List every lock published on a file by any process.
    List(ListArgs),

    /// Print the effective configuration as YAML.
    Config,
}

/// Lock type accepted on the command line.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockTypeArg {
    Read,
    Write,
}

/// Byte range and semantics shared by `lock` and `test`.
#[derive(Parser, Debug)]
pub struct RangeArgs {
    /// File to lock.
    pub path: PathBuf,

    /// Lock type.
    #[arg(short = 't', long = "type", value_enum, default_value = "write")]
    pub kind: LockTypeArg,

    /// First byte of the range.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub start: i64,

    /// Length of the range; 0 locks to end of file.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub len: i64,

    /// Use whole-file flock semantics instead of fcntl byte ranges.
    #[arg(long)]
    pub flock: bool,
}

#[derive(Parser, Debug)]
pub struct LockArgs {
    #[command(flatten)]
    pub range: RangeArgs,

    /// Wait for conflicting locks instead of failing.
    #[arg(short, long)]
    pub wait: bool,

    /// Hold the lock for this many milliseconds instead of until Enter.
    #[arg(long)]
    pub hold_ms: Option<u64>,
}

#[derive(Parser, Debug)]
pub struct TestArgs {
    #[command(flatten)]
    pub range: RangeArgs,
}

#[derive(Parser, Debug)]
pub struct ListArgs {
    /// File whose locks to list.
    pub path: PathBuf,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
