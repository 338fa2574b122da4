//! src/services/conversion_service.rs
//!
//! ConversionService — stages an upload into a private workspace, runs the
//! configured converter against it and loads the result back into memory.
//! The workspace is destroyed on every exit path.

use crate::{
    config::ConversionConfig,
    models::conversion::ConvertedFile,
    services::{
        process_service::{self, ProcessError},
        workspace_service::{Workspace, WorkspaceManager},
    },
};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::Semaphore,
};
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("failed to start converter `{command}`: {source}")]
    ProcessStart {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("converter returned exit code {exit_code}")]
    ConversionFailed { exit_code: i32 },
    #[error("converter produced no output at {}", path.display())]
    OutputMissing { path: PathBuf },
    #[error("converter did not finish within {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },
}

impl From<ProcessError> for ConversionError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Start { command, source } => Self::ProcessStart { command, source },
            ProcessError::TimedOut { timeout_ms, .. } => Self::TimedOut { timeout_ms },
            ProcessError::Wait { source, .. } => Self::Io(source),
        }
    }
}

pub type ConversionResult<T> = Result<T, ConversionError>;

/// Shared router state. Cloning is cheap; the configuration is immutable.
#[derive(Clone)]
pub struct ConversionService {
    /// Converter command, argument template, output extension and timeout.
    pub config: Arc<ConversionConfig>,

    /// Allocates the per-request workspace directories.
    pub workspaces: WorkspaceManager,

    /// Optional cap on converters running at the same time.
    limiter: Option<Arc<Semaphore>>,
}

impl ConversionService {
    pub fn new(
        config: ConversionConfig,
        workspaces: WorkspaceManager,
        max_concurrent: Option<usize>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            workspaces,
            limiter: max_concurrent.map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    /// Convert one upload.
    ///
    /// `original_name` is the client-supplied file name; `upload` yields the
    /// file's bytes. The returned file is fully buffered.
    pub async fn convert<S>(
        &self,
        original_name: &str,
        upload: S,
    ) -> ConversionResult<ConvertedFile>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let workspace = self.workspaces.create().await?;
        let result = self.convert_in(&workspace, original_name, upload).await;
        workspace.destroy().await;
        result
    }

    async fn convert_in<S>(
        &self,
        workspace: &Workspace,
        original_name: &str,
        upload: S,
    ) -> ConversionResult<ConvertedFile>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let cfg = &self.config;
        let input = workspace.input_path(original_name);
        let output = workspace.output_path(original_name, &cfg.output_extension);

        let staged = stage_upload(&input, upload).await?;
        debug!(
            workspace = %workspace.path().display(),
            input = %input.display(),
            size_bytes = staged,
            "staged upload"
        );

        let outcome = {
            let _permit = match &self.limiter {
                Some(limiter) => Some(
                    limiter
                        .acquire()
                        .await
                        .map_err(|_| io::Error::other("conversion limiter closed"))?,
                ),
                None => None,
            };
            process_service::run(&cfg.command, &cfg.arguments, &input, &output, cfg.timeout)
                .await?
        };

        if outcome.exit_code != 0 {
            return Err(ConversionError::ConversionFailed {
                exit_code: outcome.exit_code,
            });
        }

        let bytes = match fs::read(&output).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ConversionError::OutputMissing { path: output });
            }
            Err(err) => return Err(ConversionError::Io(err)),
        };

        let file_name = format!("{}{}", original_name, cfg.output_extension);
        info!(
            file_name = %file_name,
            size_bytes = bytes.len(),
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "conversion succeeded"
        );

        Ok(ConvertedFile { file_name, bytes })
    }
}

/// Copy the upload verbatim into `path`, chunk by chunk.
async fn stage_upload<S>(path: &Path, upload: S) -> io::Result<u64>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let mut file = File::create(path).await?;
    let mut size_bytes: u64 = 0;

    pin_mut!(upload);
    while let Some(chunk) = upload.next().await {
        let chunk = chunk?;
        size_bytes += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    Ok(size_bytes)
}
