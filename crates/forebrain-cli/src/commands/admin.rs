use anyhow::Result;
use forebrain_policy::{FsPolicyStore, PermissionState, PolicyStore};
use serde_json::json;
use std::path::Path;

use crate::output::print_json;
use crate::{Cli, PermissionsCmd};

pub(crate) fn run_permissions(cwd: &Path, cli: &Cli, cmd: PermissionsCmd) -> Result<()> {
    let store = FsPolicyStore::new(cwd);
    match cmd {
        PermissionsCmd::Show => {
            let policy = store.load();
            if cli.json {
                print_json(&policy)?;
            } else {
                println!("policy file: {}", store.path().display());
                println!("allow reads always:  {}", policy.allow_read_always);
                println!("allow writes always: {}", policy.allow_write_always);
                println!("deny writes always:  {}", policy.deny_write_always);
            }
        }
        PermissionsCmd::Reset => {
            let mut state = PermissionState::resolve(&store, false, false);
            state.reset(&store)?;
            if cli.json {
                print_json(&json!({"reset": true}))?;
            } else {
                println!("permissions reset; the next session starts unset");
            }
        }
    }
    Ok(())
}
