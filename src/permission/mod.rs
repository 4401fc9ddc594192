use std::path::Path;

use tracing::{debug, warn};

use crate::error::{JobError, Result};
use crate::types::PermissionStrategy;

#[cfg(not(windows))]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(not(windows))]
use self::unix as platform;
#[cfg(windows)]
use self::windows as platform;

pub use platform::PrivilegeScope;

/// Removes explicit entries so the object inherits from its parent.
/// Applying it twice has the same effect as applying it once.
pub fn strip(path: &Path) -> Result<()> {
    platform::strip(path).map_err(|e| {
        JobError::PermissionApplyFailed(format!("strip {}: {}", path.display(), e)).into()
    })
}

pub fn apply(path: &Path, strategy: PermissionStrategy, dest_sid: Option<&str>) -> Result<()> {
    match strategy {
        PermissionStrategy::StripAll => strip(path),
        PermissionStrategy::PreserveOriginal => Ok(()),
        PermissionStrategy::AssignToDestination => {
            let sid = dest_sid.filter(|s| !s.is_empty()).ok_or_else(|| {
                JobError::PermissionApplyFailed(format!(
                    "{}: AssignToDestination needs a destination SID",
                    path.display()
                ))
            })?;
            assign(path, sid)
        }
        PermissionStrategy::Hybrid => {
            strip(path)?;
            match dest_sid.filter(|s| !s.is_empty()) {
                Some(sid) => assign(path, sid),
                None => Ok(()),
            }
        }
    }
}

fn assign(path: &Path, sid: &str) -> Result<()> {
    platform::assign(path, sid).map_err(|e| {
        JobError::PermissionApplyFailed(format!("assign {} to {}: {}", path.display(), sid, e))
            .into()
    })
}

/// Permission handling for one job. Holds the process privileges the
/// strategy needs until dropped.
#[derive(Debug)]
pub struct PermissionPolicy {
    strategy: PermissionStrategy,
    _privileges: PrivilegeScope,
}

impl PermissionPolicy {
    pub fn new(strategy: PermissionStrategy) -> Self {
        let privileges = PrivilegeScope::acquire(strategy.needs_privileges());
        if strategy.needs_privileges() && !privileges.is_held() {
            warn!(
                "could not enable ownership privileges; {} may fail",
                strategy.as_str()
            );
        }
        debug!("permission policy {}", strategy.as_str());
        Self {
            strategy,
            _privileges: privileges,
        }
    }

    pub fn strategy(&self) -> PermissionStrategy {
        self.strategy
    }

    pub fn apply(&self, path: &Path, dest_sid: Option<&str>) -> Result<()> {
        apply(path, self.strategy, dest_sid)
    }
}
