//! Permission policy for file reads and writes.
//!
//! Two independent axes, each a small state machine. Session-scoped states
//! live only in the `PermissionState` value threaded through the agent;
//! always-scoped states persist to the project policy file and win over an
//! absent session decision on the next process start.

use anyhow::Result;
use forebrain_core::runtime_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AxisState {
    #[default]
    Unset,
    SessionAllow,
    SessionDeny,
    AlwaysAllow,
    AlwaysDeny,
}

impl AxisState {
    /// `None` means unresolved: the caller must ask before acting.
    pub fn allowed(self) -> Option<bool> {
        match self {
            AxisState::Unset => None,
            AxisState::SessionAllow | AxisState::AlwaysAllow => Some(true),
            AxisState::SessionDeny | AxisState::AlwaysDeny => Some(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Read,
    Write,
}

/// One user decision at a confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionChoice {
    AllowSession,
    DenySession,
    AllowAlways,
    DenyAlways,
}

/// On-disk project policy. Unknown keys are ignored so older files survive
/// upgrades; a missing or corrupt file reads as all-false.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectPolicy {
    pub allow_read_always: bool,
    pub allow_write_always: bool,
    pub deny_write_always: bool,
}

pub trait PolicyStore {
    fn load(&self) -> ProjectPolicy;
    fn save(&self, policy: &ProjectPolicy) -> Result<()>;
}

/// Policy file under the project runtime directory.
pub struct FsPolicyStore {
    path: PathBuf,
}

impl FsPolicyStore {
    pub fn new(root: &Path) -> Self {
        Self {
            path: runtime_dir(root).join("permissions.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PolicyStore for FsPolicyStore {
    fn load(&self) -> ProjectPolicy {
        let Ok(raw) = fs::read_to_string(&self.path) else {
            return ProjectPolicy::default();
        };
        serde_json::from_str(&raw).unwrap_or_default()
    }

    fn save(&self, policy: &ProjectPolicy) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(policy)?)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PermissionState {
    pub read: AxisState,
    pub write: AxisState,
    pub project: ProjectPolicy,
}

impl PermissionState {
    /// Compute the starting state for a process from the persisted policy
    /// plus environment-style pre-grants. A persisted write deny wins over
    /// everything else on that axis.
    pub fn resolve(store: &dyn PolicyStore, env_read: bool, env_write: bool) -> Self {
        let project = store.load();
        let read = if project.allow_read_always {
            AxisState::AlwaysAllow
        } else if env_read {
            AxisState::SessionAllow
        } else {
            AxisState::Unset
        };
        let write = if project.deny_write_always {
            AxisState::AlwaysDeny
        } else if project.allow_write_always {
            AxisState::AlwaysAllow
        } else if env_write {
            AxisState::SessionAllow
        } else {
            AxisState::Unset
        };
        Self {
            read,
            write,
            project,
        }
    }

    pub fn read_allowed(&self) -> Option<bool> {
        self.read.allowed()
    }

    pub fn write_allowed(&self) -> Option<bool> {
        // Persisted deny hard-overrides a session allow granted earlier in
        // the same process.
        if self.project.deny_write_always {
            return Some(false);
        }
        self.write.allowed()
    }

    /// Apply a confirmation choice to one axis, persisting always-scoped
    /// decisions. Read denial is never persisted; it stays session-scoped.
    pub fn apply_choice(
        &mut self,
        axis: Axis,
        choice: PermissionChoice,
        store: &dyn PolicyStore,
    ) -> Result<()> {
        let state = match choice {
            PermissionChoice::AllowSession => AxisState::SessionAllow,
            PermissionChoice::DenySession => AxisState::SessionDeny,
            PermissionChoice::AllowAlways => AxisState::AlwaysAllow,
            PermissionChoice::DenyAlways => AxisState::AlwaysDeny,
        };
        match axis {
            Axis::Read => self.read = state,
            Axis::Write => self.write = state,
        }

        let mut changed = false;
        match (axis, choice) {
            (Axis::Read, PermissionChoice::AllowAlways) => {
                self.project.allow_read_always = true;
                changed = true;
            }
            (Axis::Write, PermissionChoice::AllowAlways) => {
                self.project.allow_write_always = true;
                self.project.deny_write_always = false;
                changed = true;
            }
            (Axis::Write, PermissionChoice::DenyAlways) => {
                self.project.deny_write_always = true;
                self.project.allow_write_always = false;
                changed = true;
            }
            _ => {}
        }
        if changed {
            store.save(&self.project)?;
        }
        Ok(())
    }

    /// Drop all session-scoped decisions and persisted grants, returning
    /// both axes to `Unset`.
    pub fn reset(&mut self, store: &dyn PolicyStore) -> Result<()> {
        self.read = AxisState::Unset;
        self.write = AxisState::Unset;
        self.project = ProjectPolicy::default();
        store.save(&self.project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_policy_file_resolves_to_unset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsPolicyStore::new(dir.path());
        let state = PermissionState::resolve(&store, false, false);
        assert_eq!(state.read_allowed(), None);
        assert_eq!(state.write_allowed(), None);
    }

    #[test]
    fn env_grants_become_session_allows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsPolicyStore::new(dir.path());
        let state = PermissionState::resolve(&store, true, true);
        assert_eq!(state.read, AxisState::SessionAllow);
        assert_eq!(state.write, AxisState::SessionAllow);
        assert_eq!(state.write_allowed(), Some(true));
    }

    #[test]
    fn always_allow_persists_and_survives_restart() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsPolicyStore::new(dir.path());
        let mut state = PermissionState::resolve(&store, false, false);
        state
            .apply_choice(Axis::Write, PermissionChoice::AllowAlways, &store)
            .expect("apply");
        assert_eq!(state.write_allowed(), Some(true));

        // Fresh resolve simulates a new process.
        let reborn = PermissionState::resolve(&store, false, false);
        assert_eq!(reborn.write, AxisState::AlwaysAllow);
        assert_eq!(reborn.write_allowed(), Some(true));
    }

    #[test]
    fn persisted_deny_overrides_session_allow() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsPolicyStore::new(dir.path());
        store
            .save(&ProjectPolicy {
                deny_write_always: true,
                ..Default::default()
            })
            .expect("save");
        let state = PermissionState::resolve(&store, false, true);
        assert_eq!(state.write, AxisState::AlwaysDeny);
        assert_eq!(state.write_allowed(), Some(false));
    }

    #[test]
    fn always_deny_is_stable_until_reset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsPolicyStore::new(dir.path());
        let mut state = PermissionState::resolve(&store, false, false);
        state
            .apply_choice(Axis::Write, PermissionChoice::DenyAlways, &store)
            .expect("deny");
        assert_eq!(state.write_allowed(), Some(false));

        // A later session allow cannot punch through the persisted deny.
        state.write = AxisState::SessionAllow;
        assert_eq!(state.write_allowed(), Some(false));

        state.reset(&store).expect("reset");
        assert_eq!(state.write_allowed(), None);
        let reborn = PermissionState::resolve(&store, false, false);
        assert_eq!(reborn.write, AxisState::Unset);
    }

    #[test]
    fn read_deny_stays_session_scoped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsPolicyStore::new(dir.path());
        let mut state = PermissionState::resolve(&store, false, false);
        state
            .apply_choice(Axis::Read, PermissionChoice::DenySession, &store)
            .expect("deny");
        assert_eq!(state.read_allowed(), Some(false));
        assert_eq!(store.load(), ProjectPolicy::default());
    }

    #[test]
    fn corrupt_policy_file_reads_as_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsPolicyStore::new(dir.path());
        fs::create_dir_all(store.path().parent().expect("parent")).expect("mkdir");
        fs::write(store.path(), b"{not json").expect("write");
        assert_eq!(store.load(), ProjectPolicy::default());
    }
}
