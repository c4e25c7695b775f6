//! Prompt player: plays a local clip that takes priority over the downlink.

use crate::audio::format::AudioFormat;
use crate::audio::wav::load_pcm;
use crate::error::{Result, VoxlinkError};
use crate::pipeline::playback::{PlaybackControl, SharedSpeaker, apply_volume};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

const PROMPT_CHUNK: Duration = Duration::from_millis(20);

/// Plays prompt clips on the shared speaker.
///
/// While a clip plays, [`PlaybackControl::prompt_active`] is set and normal
/// playback frames are discarded.
pub struct PromptPlayer {
    speaker: SharedSpeaker,
    control: PlaybackControl,
    format: AudioFormat,
    paced: bool,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PromptPlayer {
    pub fn new(speaker: SharedSpeaker, control: PlaybackControl, format: AudioFormat) -> Self {
        Self {
            speaker,
            control,
            format,
            paced: true,
            stop: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Write chunks as fast as the speaker accepts them instead of in real time.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    /// Starts playing `clip` (PCM in the session format).
    ///
    /// Returns `Ok(false)` without doing anything if a prompt is already playing.
    pub fn play(&self, clip: Vec<u8>) -> Result<bool> {
        if !self.control.begin_prompt() {
            warn!("prompt already playing, ignoring new prompt");
            return Ok(false);
        }
        self.reap();
        self.stop.store(false, Ordering::SeqCst);

        let speaker = self.speaker.clone();
        let control = self.control.clone();
        let stop = self.stop.clone();
        let format = self.format;
        let paced = self.paced;

        let spawned = thread::Builder::new()
            .name("voxlink-prompt".to_string())
            .spawn(move || {
                play_clip(&speaker, &control, &stop, &format, paced, clip);
                control.end_prompt();
            });

        match spawned {
            Ok(handle) => {
                if let Ok(mut worker) = self.worker.lock() {
                    *worker = Some(handle);
                }
                Ok(true)
            }
            Err(e) => {
                self.control.end_prompt();
                Err(VoxlinkError::Other(format!("failed to spawn prompt player: {}", e)))
            }
        }
    }

    /// Loads a WAV clip, converting it to the session format, and plays it.
    pub fn play_file(&self, path: &Path) -> Result<bool> {
        let clip = load_pcm(path, &self.format)?;
        self.play(clip)
    }

    /// Stops the current prompt and waits for its thread.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wait();
    }

    /// Waits for the current prompt to finish.
    pub fn wait(&self) {
        let handle = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            warn!("prompt thread panicked");
            self.control.end_prompt();
        }
    }

    pub fn is_playing(&self) -> bool {
        self.control.prompt_active()
    }

    fn reap(&self) {
        if let Ok(mut worker) = self.worker.lock()
            && let Some(handle) = worker.take()
            && handle.join().is_err()
        {
            warn!("previous prompt thread panicked");
        }
    }
}

impl Drop for PromptPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn play_clip(
    speaker: &SharedSpeaker,
    control: &PlaybackControl,
    stop: &AtomicBool,
    format: &AudioFormat,
    paced: bool,
    clip: Vec<u8>,
) {
    let chunk_bytes = format.bytes_for(PROMPT_CHUNK).max(format.block_align());
    info!(bytes = clip.len(), duration = ?format.duration_of(clip.len()), "prompt started");

    let mut scratch = Vec::with_capacity(chunk_bytes);
    for chunk in clip.chunks(chunk_bytes) {
        if stop.load(Ordering::SeqCst) {
            debug!("prompt stopped early");
            break;
        }
        scratch.clear();
        scratch.extend_from_slice(chunk);
        apply_volume(&mut scratch, control.volume(), format.bits_per_sample);

        match speaker.lock() {
            Ok(mut speaker) => {
                if let Err(e) = speaker.write(&scratch) {
                    warn!(error = %e, "prompt write failed");
                }
            }
            Err(_) => {
                warn!("speaker lock poisoned, abandoning prompt");
                break;
            }
        }
        if paced {
            thread::sleep(format.duration_of(chunk.len()));
        }
    }

    if let Ok(mut speaker) = speaker.lock()
        && let Err(e) = speaker.flush()
    {
        warn!(error = %e, "prompt flush failed");
    }
    info!("prompt finished");
}
