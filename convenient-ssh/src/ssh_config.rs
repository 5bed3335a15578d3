//! `~/.ssh/config` username lookup
//!
//! When neither the host entry, the --user flag, nor the recipe names a
//! login user, the user's ssh config may. Parsing is best-effort: ssh
//! config is not a standard, so any failure just means "no answer".

use ssh2_config::{ParseRule, SshConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

/// Look up the `User` directive matching `host` in `~/.ssh/config`.
pub fn config_user(host: &str) -> Option<String> {
    let path = dirs::home_dir()?.join(".ssh").join("config");
    user_from_file(&path, host)
}

/// Look up the `User` directive matching `host` in the given config file.
pub fn user_from_file(path: &Path, host: &str) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let config = match SshConfig::default().parse(&mut reader, ParseRule::ALLOW_UNKNOWN_FIELDS) {
        Ok(config) => config,
        Err(err) => {
            debug!("couldn't parse {}: {err}", path.display());
            return None;
        }
    };
    config.query(host).user
}
