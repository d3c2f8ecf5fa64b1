//! Two-track ingest and periodic mix-down to a WAV file (§4.3).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};

use crate::audio::wav;
use crate::protocol_constants::{
    RECORDER_MIN_DURATION_SECS, RECORDER_MIX_THRESHOLD_SAMPLES, WAV_HEADER_BYTES,
};

/// One track's pending, not-yet-mixed samples.
struct Fifo {
    samples: Vec<i16>,
}

impl Fifo {
    fn new() -> Self {
        Self {
            samples: Vec::new(),
        }
    }

    fn push(&mut self, samples: &[i16]) {
        self.samples.extend_from_slice(samples);
    }

    fn take(&mut self) -> Vec<i16> {
        std::mem::take(&mut self.samples)
    }
}

/// Result of a recorder's final mix on session close (§4.3).
#[derive(Debug, Clone)]
pub enum RecorderOutcome {
    /// The artifact met the minimum duration and is on disk.
    Saved { path: PathBuf, duration_seconds: f64, bytes: u64 },
    /// The call was too short; the artifact was discarded (§4.3).
    DiscardedTooShort,
    /// Nothing was ever recorded (no output path configured, e.g. in tests).
    Discarded,
    /// A disk write failed at some point; whatever was already flushed stays,
    /// but the recorder stopped ingesting (§4.3's failure semantics).
    Failed,
}

/// Per-session two-track recorder and mixer.
///
/// Mirrors the reference project's `StreamState` in spirit — a single
/// struct owning buffered state plus a broadcast-free, purely-internal
/// write path — but here the consumer is a file on disk, not HTTP clients.
pub struct Recorder {
    path: Option<PathBuf>,
    user: Mutex<Fifo>,
    assistant: Mutex<Fifo>,
    file: Mutex<Option<File>>,
    data_bytes_written: Mutex<u64>,
    failed: AtomicBool,
    opened: AtomicBool,
}

impl Recorder {
    /// A recorder with no backing file: every ingest is accepted but
    /// nothing is ever written. Used for tests and for a session whose
    /// recording path couldn't be established.
    pub fn new_discarded() -> Self {
        Self {
            path: None,
            user: Mutex::new(Fifo::new()),
            assistant: Mutex::new(Fifo::new()),
            file: Mutex::new(None),
            data_bytes_written: Mutex::new(0),
            failed: AtomicBool::new(false),
            opened: AtomicBool::new(false),
        }
    }

    pub fn new(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            user: Mutex::new(Fifo::new()),
            assistant: Mutex::new(Fifo::new()),
            file: Mutex::new(None),
            data_bytes_written: Mutex::new(0),
            failed: AtomicBool::new(false),
            opened: AtomicBool::new(false),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Opens the output file and reserves the 44-byte header placeholder
    /// (§4.3's "container" contract), the first time anything is ingested.
    async fn ensure_open(&self) -> bool {
        if self.failed.load(Ordering::SeqCst) {
            return false;
        }
        if self.opened.load(Ordering::SeqCst) {
            return true;
        }
        let Some(path) = &self.path else {
            return false;
        };
        match File::create(path).await {
            Ok(mut file) => {
                if file.write_all(&wav::reserved_header()).await.is_err() {
                    self.failed.store(true, Ordering::SeqCst);
                    tracing::error!(path = %path.display(), "recorder failed to write reserved header");
                    return false;
                }
                *self.file.lock() = Some(file);
                self.opened.store(true, Ordering::SeqCst);
                true
            }
            Err(err) => {
                self.failed.store(true, Ordering::SeqCst);
                tracing::error!(path = %path.display(), %err, "recorder failed to open output file");
                false
            }
        }
    }

    pub fn ingest_user(&self, pcm24k_samples: &[i16]) {
        if self.failed.load(Ordering::SeqCst) {
            return;
        }
        self.user.lock().push(pcm24k_samples);
    }

    pub fn ingest_assistant(&self, pcm24k_samples: &[i16]) {
        if self.failed.load(Ordering::SeqCst) {
            return;
        }
        self.assistant.lock().push(pcm24k_samples);
    }

    /// True once either track has accumulated enough samples to warrant a
    /// mix cycle (§4.3's threshold half of the OR condition; the elapsed-time
    /// half is driven by the caller's periodic tick).
    pub fn threshold_reached(&self) -> bool {
        self.user.lock().samples.len() >= RECORDER_MIX_THRESHOLD_SAMPLES
            || self.assistant.lock().samples.len() >= RECORDER_MIX_THRESHOLD_SAMPLES
    }

    /// Runs one mix cycle: drains both FIFOs, mixes them, and appends the
    /// result to the output file. A no-op if both queues are empty.
    pub async fn mix_cycle(&self) {
        if self.failed.load(Ordering::SeqCst) {
            return;
        }
        let user_samples = self.user.lock().take();
        let assistant_samples = self.assistant.lock().take();
        if user_samples.is_empty() && assistant_samples.is_empty() {
            return;
        }
        let mixed = crate::audio::mix(&user_samples, &assistant_samples);
        self.write_samples(&mixed).await;
    }

    async fn write_samples(&self, samples: &[i16]) {
        if !self.ensure_open().await {
            return;
        }
        let bytes = wav::samples_to_bytes(samples);
        // Take the file out of the lock before awaiting: parking_lot guards
        // are !Send, and this future is spawned onto a Send-bound task.
        let Some(mut file) = self.file.lock().take() else {
            return;
        };
        let write_result = file.write_all(&bytes).await;
        *self.file.lock() = Some(file);
        if let Err(err) = write_result {
            self.failed.store(true, Ordering::SeqCst);
            tracing::error!(%err, "recorder failed to write mixed samples");
            return;
        }
        *self.data_bytes_written.lock() += bytes.len() as u64;
    }

    /// Final mix, header patch and close (§4.3). Discards artifacts shorter
    /// than [`RECORDER_MIN_DURATION_SECS`].
    pub async fn stop(&self) -> RecorderOutcome {
        self.mix_cycle().await;

        if self.failed.load(Ordering::SeqCst) {
            return RecorderOutcome::Failed;
        }

        let Some(path) = &self.path else {
            return RecorderOutcome::Discarded;
        };
        if !self.opened.load(Ordering::SeqCst) {
            return RecorderOutcome::Discarded;
        }

        let data_bytes = *self.data_bytes_written.lock();
        let sample_count = data_bytes / 2;
        let duration_seconds = sample_count as f64 / crate::protocol_constants::AI_SAMPLE_RATE as f64;

        let mut file = match self.file.lock().take() {
            Some(file) => file,
            None => return RecorderOutcome::Failed,
        };

        if let Err(err) = patch_header(&mut file, data_bytes).await {
            tracing::error!(%err, "recorder failed to patch WAV header");
            return RecorderOutcome::Failed;
        }

        if duration_seconds < RECORDER_MIN_DURATION_SECS {
            drop(file);
            let _ = tokio::fs::remove_file(path).await;
            return RecorderOutcome::DiscardedTooShort;
        }

        RecorderOutcome::Saved {
            path: path.clone(),
            duration_seconds,
            bytes: data_bytes + WAV_HEADER_BYTES as u64,
        }
    }
}

async fn patch_header(file: &mut File, data_bytes: u64) -> std::io::Result<()> {
    let header = wav::canonical_header(data_bytes as u32);
    file.seek(SeekFrom::Start(0)).await?;
    file.write_all(&header).await?;
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn discarded_recorder_accepts_ingest_silently() {
        let recorder = Recorder::new_discarded();
        recorder.ingest_user(&[1, 2, 3]);
        recorder.ingest_assistant(&[4, 5, 6]);
        recorder.mix_cycle().await;
        assert!(matches!(recorder.stop().await, RecorderOutcome::Discarded));
    }

    #[tokio::test]
    async fn threshold_reached_once_either_track_fills() {
        let recorder = Recorder::new_discarded();
        assert!(!recorder.threshold_reached());
        recorder.ingest_user(&vec![0i16; RECORDER_MIX_THRESHOLD_SAMPLES]);
        assert!(recorder.threshold_reached());
    }

    #[tokio::test]
    async fn short_recording_is_discarded_on_stop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("call.wav");
        let recorder = Recorder::new(path.clone());
        recorder.ingest_user(&vec![100i16; 100]);
        let outcome = recorder.stop().await;
        assert!(matches!(outcome, RecorderOutcome::DiscardedTooShort));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn long_recording_is_saved_with_patched_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("call.wav");
        let recorder = Recorder::new(path.clone());
        let one_second = crate::protocol_constants::AI_SAMPLE_RATE as usize;
        recorder.ingest_user(&vec![100i16; one_second + 1000]);
        let outcome = recorder.stop().await;
        match outcome {
            RecorderOutcome::Saved { bytes, .. } => {
                assert!(bytes > WAV_HEADER_BYTES as u64);
                let written = std::fs::read(&path).unwrap();
                assert_eq!(&written[0..4], b"RIFF");
            }
            other => panic!("expected Saved, got {other:?}"),
        }
    }
}
