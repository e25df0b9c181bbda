//! Synthetic capture source
//!
//! Produces fixed-size frames on a background thread at a steady interval.
//! Frames carry a little-endian sequence number followed by a ramp pattern,
//! which is enough to follow them through the relay.

use bytes::{BufMut, Bytes, BytesMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;

use crate::config::CaptureConfig;
use crate::constants::MAX_PAYLOAD_SIZE;

/// Channel between a capture source and the session, sized by `config`
pub fn frame_channel(config: &CaptureConfig) -> (mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
    mpsc::channel(config.queue_depth())
}

pub struct SyntheticCapture {
    /// Whether the capture thread should keep running
    running: Arc<AtomicBool>,

    thread_handle: Option<JoinHandle<()>>,

    /// Frames handed to the channel
    frames_produced: Arc<AtomicU64>,

    /// Frames dropped because the channel was full
    frames_dropped: Arc<AtomicU64>,
}

impl SyntheticCapture {
    /// Start producing frames into `tx`
    pub fn start(config: &CaptureConfig, tx: mpsc::Sender<Bytes>) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let frames_produced = Arc::new(AtomicU64::new(0));
        let frames_dropped = Arc::new(AtomicU64::new(0));

        let interval = config.frame_interval();
        let frame_bytes = config.frame_bytes.clamp(4, MAX_PAYLOAD_SIZE);

        let thread_running = running.clone();
        let produced = frames_produced.clone();
        let dropped = frames_dropped.clone();

        let handle = thread::Builder::new()
            .name("synthetic-capture".to_string())
            .spawn(move || {
                let mut sequence: u32 = 0;

                while thread_running.load(Ordering::Relaxed) {
                    let frame = synth_frame(sequence, frame_bytes);
                    sequence = sequence.wrapping_add(1);

                    match tx.try_send(frame) {
                        Ok(()) => {
                            produced.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }

                    thread::sleep(interval);
                }

                tracing::debug!("Synthetic capture stopped after {} frames", sequence);
            })?;

        Ok(Self {
            running,
            thread_handle: Some(handle),
            frames_produced,
            frames_dropped,
        })
    }

    /// Stop the capture thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn frames_produced(&self) -> u64 {
        self.frames_produced.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

impl Drop for SyntheticCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build one frame: sequence number then a ramp
pub fn synth_frame(sequence: u32, len: usize) -> Bytes {
    let mut frame = BytesMut::with_capacity(len.max(4));
    frame.put_u32_le(sequence);
    for i in 4..len {
        frame.put_u8((sequence as usize).wrapping_add(i) as u8);
    }
    frame.freeze()
}

/// Sequence number stamped by [`synth_frame`]
pub fn frame_sequence(frame: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = frame.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_frame_layout() {
        let frame = synth_frame(7, 10);
        assert_eq!(frame.len(), 10);
        assert_eq!(frame_sequence(&frame), Some(7));
        assert_eq!(frame[4], 11);
        assert_eq!(frame_sequence(&[1, 2]), None);
    }

    #[test]
    fn test_produces_frames_until_stopped() {
        let (tx, mut rx) = mpsc::channel(64);
        let config = CaptureConfig {
            enabled: true,
            frame_interval_ms: 1,
            frame_bytes: 32,
            queue_capacity: 64,
        };

        let mut capture = SyntheticCapture::start(&config, tx).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        capture.stop();

        assert!(!capture.is_running());
        let first = rx.try_recv().unwrap();
        assert_eq!(first.len(), 32);
        assert_eq!(frame_sequence(&first), Some(0));
        assert!(capture.frames_produced() >= 1);
    }

    #[test]
    fn test_closed_channel_ends_thread() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let config = CaptureConfig {
            enabled: true,
            frame_interval_ms: 1,
            frame_bytes: 16,
            queue_capacity: 1,
        };

        let mut capture = SyntheticCapture::start(&config, tx).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        capture.stop();
        assert_eq!(capture.frames_produced(), 0);
    }

    #[test]
    fn test_zero_queue_capacity_still_carries_frames() {
        let config = CaptureConfig {
            enabled: true,
            frame_interval_ms: 1,
            frame_bytes: 16,
            queue_capacity: 0,
        };
        let (tx, mut rx) = frame_channel(&config);

        let mut capture = SyntheticCapture::start(&config, tx).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        capture.stop();

        let first = rx.try_recv().unwrap();
        assert_eq!(frame_sequence(&first), Some(0));
        assert!(rx.try_recv().is_err());
        assert!(capture.frames_dropped() > 0);
    }
}
