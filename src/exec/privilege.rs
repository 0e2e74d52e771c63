//! Dropping privileges to the unprivileged `updata` account.
//!
//! Looks the account up, and if the effective uid/gid differ from it,
//! switches. Skipped entirely in test mode by the caller (see the two
//! `src/bin/*.rs` entry points).

use anyhow::{anyhow, Context, Result};
use nix::unistd::{getegid, geteuid, setgid, setuid, User};

use crate::logging;

pub fn drop_to_user(name: &str) -> Result<()> {
    let user = User::from_name(name)
        .with_context(|| format!("looking up user \"{name}\""))?
        .ok_or_else(|| anyhow!("user \"{name}\" does not exist"))?;

    if geteuid() == user.uid && getegid() == user.gid {
        return Ok(());
    }

    logging::log(&format!(
        "Switching to user \"{name}\" (uid {}, gid {})",
        user.uid, user.gid
    ));

    setgid(user.gid).with_context(|| format!("setgid while switching to \"{name}\""))?;
    setuid(user.uid).with_context(|| format!("setuid while switching to \"{name}\""))?;

    Ok(())
}
