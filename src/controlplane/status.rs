//! Status Catalog
//!
//! The fixed taxonomy of operation failure codes (700-717). Each code maps
//! 1:1 to a canonical description.

use crate::controlplane::volume::VolumeState;
use serde::Serialize;

/// Operation failure codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u16)]
pub enum Status {
    Timeout = 700,
    CreateVolume = 701,
    InfoVolumes = 702,
    DelVolume = 703,
    NotFound = 704,
    CreatePool = 705,
    InfoPool = 706,
    InfoPoolIo = 707,
    DelPool = 708,
    ModPool = 709,
    ResizeVolume = 710,
    CreateSnapshot = 711,
    InfoSnapshot = 712,
    DelSnapshot = 713,
    ExportVolume = 714,
    CreateDisk = 715,
    MapVolume = 716,
    UnmapVolume = 717,
}

impl Status {
    /// Every code, in numeric order
    pub const ALL: [Status; 18] = [
        Status::Timeout,
        Status::CreateVolume,
        Status::InfoVolumes,
        Status::DelVolume,
        Status::NotFound,
        Status::CreatePool,
        Status::InfoPool,
        Status::InfoPoolIo,
        Status::DelPool,
        Status::ModPool,
        Status::ResizeVolume,
        Status::CreateSnapshot,
        Status::InfoSnapshot,
        Status::DelSnapshot,
        Status::ExportVolume,
        Status::CreateDisk,
        Status::MapVolume,
        Status::UnmapVolume,
    ];

    /// Numeric code
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Canonical description
    pub fn description(self) -> &'static str {
        match self {
            Status::Timeout => "Request Timeout",
            Status::CreateVolume => "Create Volume Failed",
            Status::InfoVolumes => "Info Volumes Failed",
            Status::DelVolume => "Delete Volume Failed",
            Status::NotFound => "Not Found",
            Status::CreatePool => "Create Pool Failed",
            Status::InfoPool => "Info Pool Failed",
            Status::InfoPoolIo => "Info Pool IO Failed",
            Status::DelPool => "Delete Pool Failed",
            Status::ModPool => "Modify Pool Failed",
            Status::ResizeVolume => "Resize Volume Failed",
            Status::CreateSnapshot => "Create Snapshot Failed",
            Status::InfoSnapshot => "Info Snapshot Failed",
            Status::DelSnapshot => "Delete Snapshot Failed",
            Status::ExportVolume => "Export Volume Failed",
            Status::CreateDisk => "Create Disk Failed",
            Status::MapVolume => "Map Volume Failed",
            Status::UnmapVolume => "Unmap Volume Failed",
        }
    }

    /// Look up a status by numeric code
    pub fn from_code(code: u16) -> Option<Status> {
        Status::ALL.iter().copied().find(|s| s.code() == code)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code(), self.description())
    }
}

// =============================================================================
// Failure
// =============================================================================

/// A failed orchestration, ready to cross the HTTP boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Coarse operation status
    pub status: Status,
    /// Cluster diagnostic text forwarded instead of the canonical description
    pub detail: Option<String>,
    /// How far a multi-step volume workflow got before failing
    pub progress: Option<VolumeState>,
}

impl Failure {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            detail: None,
            progress: None,
        }
    }

    pub fn with_detail(mut self, detail: Option<&str>) -> Self {
        self.detail = detail.map(str::to_string);
        self
    }

    pub fn with_progress(mut self, state: VolumeState) -> Self {
        self.progress = Some(state);
        self
    }

    /// Text sent as the response body
    pub fn message(&self) -> &str {
        self.detail
            .as_deref()
            .unwrap_or_else(|| self.status.description())
    }
}

impl From<Status> for Failure {
    fn from(status: Status) -> Self {
        Failure::new(status)
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status.code(), self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_codes_are_reserved_range() {
        for status in Status::ALL {
            assert!((700..=717).contains(&status.code()), "{:?}", status);
        }
        assert_eq!(Status::Timeout.code(), 700);
        assert_eq!(Status::UnmapVolume.code(), 717);
    }

    #[test]
    fn test_descriptions_are_unique() {
        let descriptions: HashSet<_> = Status::ALL.iter().map(|s| s.description()).collect();
        assert_eq!(descriptions.len(), Status::ALL.len());
    }

    #[test]
    fn test_from_code_round_trips() {
        for status in Status::ALL {
            assert_eq!(Status::from_code(status.code()), Some(status));
        }
        assert_eq!(Status::from_code(400), None);
        assert_eq!(Status::from_code(718), None);
    }

    #[test]
    fn test_failure_message() {
        let failure = Failure::new(Status::CreatePool);
        assert_eq!(failure.message(), "Create Pool Failed");

        let failure = Failure::new(Status::CreatePool).with_detail(Some("(17) File exists"));
        assert_eq!(failure.message(), "(17) File exists");
        assert_eq!(failure.to_string(), "705: (17) File exists");
    }
}
