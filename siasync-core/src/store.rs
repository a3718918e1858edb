use std::future::Future;
use std::path::Path;

use crate::client::{RemoteFileRecord, SiaError};

/// Remote file store operations the reconciliation engine depends on.
///
/// Every call is a single request/response; implementations carry no
/// sync policy of their own.
pub trait RemoteStore: Send + Sync {
    fn list_files(&self) -> impl Future<Output = Result<Vec<RemoteFileRecord>, SiaError>> + Send;

    fn upload(
        &self,
        logical_path: &str,
        source: &Path,
        duration: u64,
        renew: bool,
    ) -> impl Future<Output = Result<(), SiaError>> + Send;

    fn delete(&self, logical_path: &str) -> impl Future<Output = Result<(), SiaError>> + Send;

    /// Writes the recovery metadata for `logical_path` to `destination` on
    /// the machine running the remote service.
    fn download_metadata(
        &self,
        logical_path: &str,
        destination: &Path,
    ) -> impl Future<Output = Result<(), SiaError>> + Send;
}
