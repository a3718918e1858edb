use serde::Serialize;
use siasync_core::RemoteFileRecord;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Renter-wide totals over one listing snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RenterSummary {
    pub files_available: usize,
    pub files_total: usize,
    pub files_incomplete: usize,
    pub bytes_used: u64,
}

impl RenterSummary {
    pub fn from_listing(listing: &[RemoteFileRecord]) -> Self {
        listing
            .iter()
            .fold(Self::default(), |mut summary, record| {
                summary.files_total += 1;
                if record.available {
                    summary.files_available += 1;
                }
                if !record.is_complete() {
                    summary.files_incomplete += 1;
                }
                summary.bytes_used = summary.bytes_used.saturating_add(record.size_bytes);
                summary
            })
    }

    pub fn gigabytes_used(&self) -> f64 {
        self.bytes_used as f64 / BYTES_PER_GB
    }
}
