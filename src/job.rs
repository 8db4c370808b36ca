//! Background conversion jobs with cooperative cancellation

use crate::analysis::ConversionReport;
use crate::config::ConversionParams;
use crate::error::{ConvertError, Result as ConvertResult};
use crate::AudioToMidi;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Shared cancellation flag, checked between pipeline stages
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the run stops at its next stage boundary
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation has been requested
    pub fn check(&self) -> ConvertResult<()> {
        if self.is_cancelled() {
            Err(ConvertError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Everything a worker needs for one conversion
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub audio_path: PathBuf,
    pub output_path: PathBuf,
    pub params: ConversionParams,
}

impl ConversionRequest {
    pub fn new<A: Into<PathBuf>, O: Into<PathBuf>>(
        audio_path: A,
        output_path: O,
        params: ConversionParams,
    ) -> Self {
        Self {
            audio_path: audio_path.into(),
            output_path: output_path.into(),
            params,
        }
    }
}

/// A conversion running on its own worker thread
///
/// Each job owns its converter and buffers; concurrent jobs share nothing.
#[derive(Debug)]
pub struct ConversionJob {
    handle: thread::JoinHandle<ConvertResult<ConversionReport>>,
    cancel: CancelToken,
}

impl ConversionJob {
    /// Start a conversion on a new worker thread
    pub fn spawn(converter: AudioToMidi, request: ConversionRequest) -> ConvertResult<Self> {
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();

        let handle = thread::Builder::new()
            .name("hit2midi-convert".to_string())
            .spawn(move || {
                converter.convert_with_report(
                    &request.audio_path,
                    &request.output_path,
                    &request.params,
                    &worker_cancel,
                )
            })?;

        Ok(ConversionJob { handle, cancel })
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the worker finishes and return its result
    pub fn join(self) -> ConvertResult<ConversionReport> {
        self.handle
            .join()
            .map_err(|_| ConvertError::Analysis("Conversion worker panicked".to_string()))?
    }
}
