use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use siasync_integrations::Emblem;
use siasync_integrations::ids::GIO_EMBLEMS_ATTRIBUTE;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmblemTask {
    pub path: PathBuf,
    pub emblem: Emblem,
}

pub type EmblemSender = mpsc::UnboundedSender<EmblemTask>;
pub type EmblemReceiver = mpsc::UnboundedReceiver<EmblemTask>;

pub fn emblem_channel() -> (EmblemSender, EmblemReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Error)]
pub enum EmblemError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

pub trait EmblemWriter: Send + Sync + 'static {
    fn apply(
        &self,
        path: &Path,
        emblem: Emblem,
    ) -> impl Future<Output = Result<(), EmblemError>> + Send;
}

/// Writes `metadata::emblems` through the `gio` command line tool.
#[derive(Debug, Clone)]
pub struct GioEmblemWriter {
    program: String,
}

impl GioEmblemWriter {
    pub fn new() -> Self {
        Self::with_program("gio")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for GioEmblemWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl EmblemWriter for GioEmblemWriter {
    async fn apply(&self, path: &Path, emblem: Emblem) -> Result<(), EmblemError> {
        let output = Command::new(&self.program)
            .arg("set")
            .arg("-t")
            .arg("stringv")
            .arg(path)
            .arg(GIO_EMBLEMS_ATTRIBUTE)
            .arg(emblem.icon_name())
            .output()
            .await
            .map_err(|source| EmblemError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(EmblemError::Failed {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

pub struct EmblemApplier<W> {
    writer: W,
    rx: EmblemReceiver,
}

impl<W: EmblemWriter> EmblemApplier<W> {
    pub fn new(writer: W, rx: EmblemReceiver) -> Self {
        Self { writer, rx }
    }

    /// Applies queued emblems in order until every sender is gone. Returns
    /// how many were applied successfully.
    pub async fn run(mut self) -> usize {
        let mut applied = 0usize;
        while let Some(task) = self.rx.recv().await {
            match self.writer.apply(&task.path, task.emblem).await {
                Ok(()) => applied += 1,
                Err(err) => {
                    tracing::warn!(path = %task.path.display(), emblem = %task.emblem, error = %err, "failed to apply emblem");
                }
            }
        }
        applied
    }

    pub fn spawn(self) -> JoinHandle<usize> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingWriter {
        applied: Arc<Mutex<Vec<(PathBuf, Emblem)>>>,
        fail_on: Option<PathBuf>,
    }

    impl EmblemWriter for RecordingWriter {
        async fn apply(&self, path: &Path, emblem: Emblem) -> Result<(), EmblemError> {
            if self.fail_on.as_deref() == Some(path) {
                return Err(EmblemError::Spawn {
                    program: "test".into(),
                    source: std::io::Error::other("boom"),
                });
            }
            self.applied
                .lock()
                .unwrap()
                .push((path.to_path_buf(), emblem));
            Ok(())
        }
    }

    #[tokio::test]
    async fn applies_tasks_in_fifo_order() {
        let writer = RecordingWriter::default();
        let (tx, rx) = emblem_channel();
        tx.send(EmblemTask {
            path: "/sync/a.txt".into(),
            emblem: Emblem::Complete,
        })
        .unwrap();
        tx.send(EmblemTask {
            path: "/sync/b.txt".into(),
            emblem: Emblem::InProgress,
        })
        .unwrap();
        drop(tx);

        let applied = EmblemApplier::new(writer.clone(), rx).run().await;

        assert_eq!(applied, 2);
        assert_eq!(
            *writer.applied.lock().unwrap(),
            vec![
                (PathBuf::from("/sync/a.txt"), Emblem::Complete),
                (PathBuf::from("/sync/b.txt"), Emblem::InProgress),
            ]
        );
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_queue() {
        let writer = RecordingWriter {
            fail_on: Some("/sync/bad.txt".into()),
            ..Default::default()
        };
        let (tx, rx) = emblem_channel();
        let handle = EmblemApplier::new(writer.clone(), rx).spawn();
        for name in ["/sync/bad.txt", "/sync/good.txt"] {
            tx.send(EmblemTask {
                path: name.into(),
                emblem: Emblem::Urgent,
            })
            .unwrap();
        }
        drop(tx);

        assert_eq!(handle.await.unwrap(), 1);
        assert_eq!(writer.applied.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn gio_writer_reports_nonzero_exit() {
        let writer = GioEmblemWriter::with_program("false");
        let err = writer
            .apply(Path::new("/tmp/a.txt"), Emblem::Default)
            .await
            .unwrap_err();
        assert!(matches!(err, EmblemError::Failed { .. }));
    }

    #[tokio::test]
    async fn gio_writer_reports_missing_program() {
        let writer = GioEmblemWriter::with_program("siasync-no-such-program");
        let err = writer
            .apply(Path::new("/tmp/a.txt"), Emblem::Default)
            .await
            .unwrap_err();
        assert!(matches!(err, EmblemError::Spawn { .. }));
    }
}
