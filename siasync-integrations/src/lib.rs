pub mod ids;

/// Status marker shown on a synced file in the file manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Emblem {
    InProgress,
    Default,
    Complete,
    Urgent,
}

impl Emblem {
    pub fn icon_name(self) -> &'static str {
        match self {
            Self::InProgress => "view-refresh",
            Self::Default => "emblem-default",
            Self::Complete => "emblem-favorite",
            Self::Urgent => "emblem-important",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Default => "default",
            Self::Complete => "complete",
            Self::Urgent => "urgent",
        }
    }
}

impl std::fmt::Display for Emblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
