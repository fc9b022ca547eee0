//! Command implementations for advlock.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations. Every command except `config` runs against a
//! filesystem lock namespace, as the current process.

mod list;
mod lock;
mod target;
mod test_cmd;

use crate::cli::{Cli, Command};
use advlock::config::Config;
use advlock::error::{LockError, Result};
use advlock::lockf::{DirNamespace, LockEngine, ProcessIdentity};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Dispatch a command to its implementation.
pub fn dispatch(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Config => cmd_config(&config),
        Command::Lock(args) => lock::cmd_lock(&engine(config), args),
        Command::Test(args) => test_cmd::cmd_test(&engine(config), args),
        Command::List(args) => list::cmd_list(&engine(config), args),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Ok(Config::default()),
    }
}

/// Engine for this process over the configured namespace root.
fn engine(config: Config) -> LockEngine {
    let namespace = DirNamespace::from_config(&config);
    debug!(root = %namespace.root().display(), "using lock namespace");
    LockEngine::new(Arc::new(namespace), ProcessIdentity::current(), config)
}

fn cmd_config(config: &Config) -> Result<()> {
    let yaml = config.to_yaml()?;
    print!("{}", yaml);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{ListArgs, LockArgs, LockTypeArg, RangeArgs};
    use std::fs;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        Config {
            namespace_root: dir.path().join("ns"),
            poll_interval_ms: 5,
            ..Config::default()
        }
    }

    #[test]
    fn missing_config_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            load_config(Some(&dir.path().join("nope.yaml"))),
            Err(LockError::Config(_))
        ));
        assert_eq!(load_config(None).unwrap(), Config::default());
    }

    #[test]
    fn lock_then_list_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, vec![0u8; 64]).unwrap();
        let config = config_in(&dir);

        lock::cmd_lock(
            &engine(config.clone()),
            LockArgs {
                range: RangeArgs {
                    path: path.clone(),
                    kind: LockTypeArg::Write,
                    start: 0,
                    len: 16,
                    flock: false,
                },
                wait: false,
                hold_ms: Some(1),
            },
        )
        .unwrap();

        // Released on exit, so nothing is left to list.
        let engine = engine(config);
        let key = target::key_of(&path).unwrap();
        assert!(engine.remote_locks(key).unwrap().is_empty());
        list::cmd_list(&engine, ListArgs { path }).unwrap();
    }
}
