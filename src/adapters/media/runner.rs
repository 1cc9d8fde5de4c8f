use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::adapters::media::video::VideoFileSource;
use crate::adapters::media::webcam::{CaptureConfig, WebcamCapture};
use crate::application::ports::{FrameSource, SharedDetector, StreamPort, StreamSourceSpec};
use crate::application::render::render_frame;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::model::Confidence;
use crate::domain::stream::{summarize_detections, StreamEvent};

/// Runs one stream at a time on a dedicated worker thread: pull a frame,
/// detect, annotate, publish. Playback speed is whatever inference allows;
/// there is no pacing and no backpressure beyond the broadcast buffer.
pub struct StreamRunner {
    tx: broadcast::Sender<StreamEvent>,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StreamRunner {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            tx,
            stop: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Signals the current worker (if any) and waits for it to wind down.
    /// The wait is bounded by one frame-read cycle.
    async fn join_worker(&self) -> DomainResult<()> {
        self.stop.store(true, Ordering::SeqCst);
        let handle = self
            .worker
            .lock()
            .map_err(|_| DomainError::OperationFailed("stream worker lock poisoned".into()))?
            .take();

        if let Some(handle) = handle {
            tokio::task::spawn_blocking(move || {
                let _ = handle.join();
            })
            .await
            .map_err(|_| DomainError::OperationFailed("stream worker join aborted".into()))?;
        }
        Ok(())
    }
}

impl Default for StreamRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamPort for StreamRunner {
    async fn start(
        &self,
        source: StreamSourceSpec,
        detector: SharedDetector,
        confidence: Confidence,
    ) -> DomainResult<()> {
        self.join_worker().await?;
        self.stop.store(false, Ordering::SeqCst);

        // Open the source before spawning the worker: a file the decoder
        // rejects or a camera that will not open fails this call, instead of
        // racing the page's socket subscription with a broadcast event that
        // nobody may be listening for yet.
        let source = tokio::task::spawn_blocking(move || open_source(source))
            .await
            .map_err(|_| DomainError::OperationFailed("source open task aborted".into()))?
            .map_err(|e| {
                warn!("could not open stream source: {e:#}");
                DomainError::OperationFailed(format!("could not open stream source: {e}"))
            })?;

        let tx = self.tx.clone();
        let stop = self.stop.clone();
        let handle = std::thread::spawn(move || {
            match run_stream_loop(source, detector, confidence, &tx, &stop) {
                Ok(()) => {
                    info!("stream finished");
                    let _ = tx.send(StreamEvent::Ended);
                }
                Err(e) => {
                    warn!("stream failed: {e:#}");
                    let _ = tx.send(StreamEvent::Failed(e.to_string()));
                }
            }
        });

        *self
            .worker
            .lock()
            .map_err(|_| DomainError::OperationFailed("stream worker lock poisoned".into()))? =
            Some(handle);
        Ok(())
    }

    async fn stop(&self) -> DomainResult<()> {
        self.join_worker().await
    }

    async fn subscribe(&self) -> DomainResult<broadcast::Receiver<StreamEvent>> {
        Ok(self.tx.subscribe())
    }
}

fn open_source(spec: StreamSourceSpec) -> anyhow::Result<Box<dyn FrameSource>> {
    match spec {
        StreamSourceSpec::Video { file } => Ok(Box::new(VideoFileSource::from_upload(file)?)),
        StreamSourceSpec::Webcam { device } => {
            Ok(Box::new(WebcamCapture::open(&device, &CaptureConfig::default())?))
        }
    }
}

/// The blocking read → detect → publish loop shared by both stream drivers.
/// Exits on end-of-stream, on error, or within one frame-read cycle of the
/// stop flag being set. The source is dropped (and its handles released) on
/// every one of those paths.
pub fn run_stream_loop(
    mut source: Box<dyn FrameSource>,
    detector: SharedDetector,
    confidence: Confidence,
    tx: &broadcast::Sender<StreamEvent>,
    stop: &AtomicBool,
) -> anyhow::Result<()> {
    let mut fps_est: f32 = 0.0;
    let mut last_t = Instant::now();

    loop {
        if stop.load(Ordering::SeqCst) {
            return Ok(());
        }

        let Some(frame) = source.read_frame()? else {
            return Ok(());
        };

        let (mut meta, jpeg) = {
            let mut guard = detector.lock().map_err(|_| anyhow!("detector lock poisoned"))?;
            render_frame(&frame, confidence, guard.as_mut())?
        };

        let dt = last_t.elapsed().as_secs_f32().max(0.001);
        last_t = Instant::now();
        fps_est = 0.9 * fps_est + 0.1 * (1.0 / dt);
        meta.fps_est = fps_est;

        debug!(
            infer_ms = meta.infer_ms,
            summary = %summarize_detections(&meta.detections),
            "frame processed"
        );

        if tx.receiver_count() > 0 {
            let _ = tx.send(StreamEvent::Frame { meta, jpeg });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    use image::RgbImage;

    use crate::application::ports::Detector;
    use crate::domain::detection::Detection;

    struct NullDetector;

    impl Detector for NullDetector {
        fn detect(&mut self, _: &RgbImage, _: Confidence) -> anyhow::Result<Vec<Detection>> {
            Ok(vec![])
        }
    }

    fn shared_detector() -> SharedDetector {
        Arc::new(Mutex::new(Box::new(NullDetector) as Box<dyn Detector>))
    }

    fn conf() -> Confidence {
        Confidence::from_percent(50).unwrap()
    }

    /// Yields a fixed number of frames, then end-of-stream.
    struct FiniteSource {
        left: usize,
    }

    impl FrameSource for FiniteSource {
        fn read_frame(&mut self) -> anyhow::Result<Option<RgbImage>> {
            if self.left == 0 {
                return Ok(None);
            }
            self.left -= 1;
            Ok(Some(RgbImage::new(64, 64)))
        }
    }

    /// Blocks on a permit before every read, counting reads.
    struct GatedSource {
        gate: mpsc::Receiver<()>,
        reads: Arc<AtomicUsize>,
    }

    impl FrameSource for GatedSource {
        fn read_frame(&mut self) -> anyhow::Result<Option<RgbImage>> {
            self.gate.recv()?;
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(Some(RgbImage::new(64, 64)))
        }
    }

    #[test]
    fn loop_ends_at_end_of_stream_and_publishes_every_frame() {
        let (tx, mut rx) = broadcast::channel(16);
        let stop = AtomicBool::new(false);

        let source = Box::new(FiniteSource { left: 3 });
        run_stream_loop(source, shared_detector(), conf(), &tx, &stop).unwrap();

        let mut frames = 0;
        while let Ok(StreamEvent::Frame { .. }) = rx.try_recv() {
            frames += 1;
        }
        assert_eq!(frames, 3);
    }

    #[test]
    fn preset_stop_flag_means_no_reads() {
        let (tx, _rx) = broadcast::channel(16);
        let stop = AtomicBool::new(true);

        let reads = Arc::new(AtomicUsize::new(0));
        let (_gate_tx, gate_rx) = mpsc::channel();
        let source = Box::new(GatedSource { gate: gate_rx, reads: reads.clone() });

        run_stream_loop(source, shared_detector(), conf(), &tx, &stop).unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stop_terminates_within_one_frame_read_cycle() {
        let (tx, mut rx) = broadcast::channel(16);
        let stop = Arc::new(AtomicBool::new(false));
        let reads = Arc::new(AtomicUsize::new(0));
        let (gate_tx, gate_rx) = mpsc::channel();

        let source = Box::new(GatedSource { gate: gate_rx, reads: reads.clone() });
        let detector = shared_detector();
        let stop_worker = stop.clone();
        let handle = std::thread::spawn(move || {
            run_stream_loop(source, detector, conf(), &tx, &stop_worker)
        });

        // First frame flows normally.
        gate_tx.send(()).unwrap();
        match rx.blocking_recv().unwrap() {
            StreamEvent::Frame { .. } => {}
            other => panic!("expected a frame, got {other:?}"),
        }

        // Stop, then allow at most one more read to complete.
        stop.store(true, Ordering::SeqCst);
        let _ = gate_tx.send(());

        handle.join().unwrap().unwrap();
        assert!(reads.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn read_errors_are_propagated_not_panicked() {
        struct BrokenSource;
        impl FrameSource for BrokenSource {
            fn read_frame(&mut self) -> anyhow::Result<Option<RgbImage>> {
                Err(anyhow!("decode failed"))
            }
        }

        let (tx, _rx) = broadcast::channel(16);
        let stop = AtomicBool::new(false);
        let err = run_stream_loop(Box::new(BrokenSource), shared_detector(), conf(), &tx, &stop)
            .unwrap_err();
        assert!(err.to_string().contains("decode failed"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn undecodable_video_fails_the_start_call() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"this is not a video").unwrap();

        let runner = StreamRunner::new();
        // No subscriber yet, as on the page where the socket and the POST
        // race: the failure must come back from start itself.
        let err = runner
            .start(StreamSourceSpec::Video { file }, shared_detector(), conf())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::OperationFailed(_)));
        assert!(err.to_string().contains("could not open stream source"));

        // The runner is still usable afterwards.
        runner.stop().await.unwrap();
    }
}
