//! Scheduled job kinds
//!
//! Triggering is left to an external scheduler; it names a job and the node
//! runs its body.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Unknown job: {0}")]
pub struct UnknownJob(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Hourly presence update and status report
    UpdateStatus,
    /// Avatar sweep and watch pruning
    IntervalMin15,
    /// Daily admin roster refresh
    UpdateAdmins,
    /// Daily counter flush
    SendCount,
    /// Daily dataset backup
    BackupFiles,
    /// Monthly reset
    ResetData,
    /// Confirm last cycle's nominees, then nominate
    WhitelistSweep,
}

impl JobKind {
    pub const ALL: [JobKind; 7] = [
        JobKind::UpdateStatus,
        JobKind::IntervalMin15,
        JobKind::UpdateAdmins,
        JobKind::SendCount,
        JobKind::BackupFiles,
        JobKind::ResetData,
        JobKind::WhitelistSweep,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            JobKind::UpdateStatus => "update_status",
            JobKind::IntervalMin15 => "interval_min_15",
            JobKind::UpdateAdmins => "update_admins",
            JobKind::SendCount => "send_count",
            JobKind::BackupFiles => "backup_files",
            JobKind::ResetData => "reset_data",
            JobKind::WhitelistSweep => "whitelist_sweep",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for JobKind {
    type Err = UnknownJob;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|job| job.name() == wanted)
            .ok_or_else(|| UnknownJob(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        for job in JobKind::ALL {
            assert_eq!(job.name().parse::<JobKind>().unwrap(), job);
        }
        assert_eq!("whitelist-sweep".parse::<JobKind>().unwrap(), JobKind::WhitelistSweep);
        assert!("hourly".parse::<JobKind>().is_err());
    }
}
