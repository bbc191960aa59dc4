//! Raw sockets require administrative privilege (§6, "Required privileges").
//!
//! Checking up front turns a confusing `EPERM` deep inside the sender into a
//! clear `PERMISSION_DENIED` before any socket is opened, grounded in the
//! `caps` capability check the teacher bundles as a Linux-only dependency.

use crate::error::{NetError, Result};

/// Whether the current process can open raw sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Privilege {
    pub is_privileged: bool,
}

impl Privilege {
    /// Discover the current process' privilege to open raw sockets.
    ///
    /// On Linux this checks for `CAP_NET_RAW` in the effective set. On other
    /// Unix platforms it falls back to checking for the superuser. Windows is
    /// assumed privileged; the platform's own ACL check on `Socket::new`
    /// surfaces any failure instead.
    #[must_use]
    pub fn discover() -> Self {
        #[cfg(target_os = "linux")]
        {
            let has_cap_net_raw = caps::has_cap(None, caps::CapSet::Effective, caps::Capability::CAP_NET_RAW)
                .unwrap_or(false);
            Self {
                is_privileged: has_cap_net_raw || is_root(),
            }
        }
        #[cfg(all(unix, not(target_os = "linux")))]
        {
            Self { is_privileged: is_root() }
        }
        #[cfg(not(unix))]
        {
            Self { is_privileged: true }
        }
    }

    pub fn ensure(self) -> Result<()> {
        if self.is_privileged {
            Ok(())
        } else {
            Err(NetError::PermissionDenied(std::io::Error::from(
                std::io::ErrorKind::PermissionDenied,
            )))
        }
    }
}

#[cfg(unix)]
fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_does_not_panic() {
        let _ = Privilege::discover();
    }
}
