//! Shared file-mode enforcement for the host configuration file and the
//! repository's plan directories: credentials at mode <= 0o640, plan
//! directories at mode <= 0o770. Follows the same unix-only
//! `PermissionsExt::mode()` check as `pgpass.rs::has_correct_permissions`,
//! with the same "no-op on Windows" fallback.

use std::path::Path;

use crate::error::{PlanPulseError, Result};

pub fn check_max_mode(path: &Path, max_mode: u32) -> Result<()> {
    #[cfg(target_family = "unix")]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = std::fs::metadata(path)?;
        let mode = metadata.permissions().mode() & 0o777;
        if mode & !max_mode != 0 {
            return Err(PlanPulseError::PermissionsTooLoose {
                path: path.display().to_string(),
                mode,
                reference: max_mode,
            });
        }
        Ok(())
    }

    #[cfg(not(target_family = "unix"))]
    {
        let _ = (path, max_mode);
        Ok(())
    }
}

pub const HOSTS_CONF_MAX_MODE: u32 = 0o640;
pub const PLAN_DIR_MAX_MODE: u32 = 0o770;

#[cfg(all(test, target_family = "unix"))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::NamedTempFile;

    #[test]
    fn accepts_file_at_or_below_reference_mode() {
        let file = NamedTempFile::new().unwrap();
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600)).unwrap();
        assert!(check_max_mode(file.path(), HOSTS_CONF_MAX_MODE).is_ok());
    }

    #[test]
    fn rejects_file_looser_than_reference_mode() {
        let file = NamedTempFile::new().unwrap();
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(check_max_mode(file.path(), HOSTS_CONF_MAX_MODE).is_err());
    }
}
