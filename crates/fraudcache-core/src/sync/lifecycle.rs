use std::fmt;

use crate::cache::TierKind;
use crate::error::LifecycleError;

/// Where a cache version is in its install/activate lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionState {
    Installing,
    /// Precached; waiting to activate.
    Installed,
    Activating,
    /// Stale tiers are purged and this version controls the pages.
    Activated,
    /// Failed to install, or replaced. Terminal.
    Redundant,
}

impl VersionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionState::Installing => "installing",
            VersionState::Installed => "installed",
            VersionState::Activating => "activating",
            VersionState::Activated => "activated",
            VersionState::Redundant => "redundant",
        }
    }

    /// A failed reconcile drops back from `Activating` to `Installed` so
    /// activation can be attempted again.
    pub fn can_advance_to(self, next: VersionState) -> bool {
        use VersionState::*;
        matches!(
            (self, next),
            (Installing, Installed)
                | (Installing, Redundant)
                | (Installed, Activating)
                | (Installed, Redundant)
                | (Activating, Activated)
                | (Activating, Installed)
                | (Activated, Redundant)
        )
    }
}

impl fmt::Display for VersionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    version: String,
    state: VersionState,
    /// Version that controlled the pages when this one started installing.
    previous: Option<String>,
    controlling: bool,
}

impl Lifecycle {
    pub fn new(version: impl Into<String>, previous: Option<String>) -> Self {
        Self {
            version: version.into(),
            state: VersionState::Installing,
            previous,
            controlling: false,
        }
    }

    /// A version whose static tier was installed and activated by an earlier
    /// run and is still the newest on disk.
    pub fn resumed(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            state: VersionState::Activated,
            previous: None,
            controlling: true,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn state(&self) -> VersionState {
        self.state
    }

    pub fn previous(&self) -> Option<&str> {
        self.previous.as_deref()
    }

    pub fn is_controlling(&self) -> bool {
        self.controlling
    }

    /// Installed while an older version still controls the pages.
    pub fn is_waiting(&self) -> bool {
        self.state == VersionState::Installed && self.previous.is_some()
    }

    /// Move to `next`, returning the state that was left.
    pub fn advance(&mut self, next: VersionState) -> Result<VersionState, LifecycleError> {
        if !self.state.can_advance_to(next) {
            return Err(LifecycleError::InvalidTransition {
                version: self.version.clone(),
                from: self.state,
                to: next,
            });
        }
        let left = std::mem::replace(&mut self.state, next);
        match next {
            VersionState::Activated => {
                self.controlling = true;
                self.previous = None;
            }
            VersionState::Redundant => self.controlling = false,
            _ => {}
        }
        Ok(left)
    }
}

/// A version other than `current` that still has a static tier, which means
/// it controls the pages until `current` activates. With several, the
/// highest-sorting name wins.
pub fn previous_version(tier_names: &[String], current: &str) -> Option<String> {
    let prefix = format!("{}-v", TierKind::Static.prefix());
    tier_names
        .iter()
        .filter_map(|name| name.strip_prefix(prefix.as_str()))
        .filter(|version| *version != current)
        .max()
        .map(str::to_string)
}
