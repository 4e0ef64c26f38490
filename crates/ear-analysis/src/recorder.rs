//! Streaming key recorder.
//!
//! ```text
//! audio callback ──push_audio──▶ SampleRing ──▶ analysis thread ──▶ KeyEstimate
//!                                                  │                   │
//!                                   estimator + vote pool       subscribe() wake-ups
//! ```
//!
//! Everything is `&self`, so a recorder can be shared in an `Arc` between the
//! audio callback, the UI and whatever consumes the estimates.

use crate::config::RecorderConfig;
use crate::estimator::{chroma_factory, EstimatorFactory, SpectralKeyEstimator};
use crate::key::KeyMode;
use crate::live::{run_analysis_loop, KeyEstimate, LiveKeyState, Session};
use arc_swap::ArcSwapOption;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use ear_core::{AtomicDouble, AtomicFlag, AtomicFloat, Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Running analysis thread.
struct Worker {
    handle: JoinHandle<Box<dyn SpectralKeyEstimator>>,
    /// Disconnects when the thread exits, normally or by panic.
    exited: Receiver<()>,
    session: Arc<Session>,
    sample_rate: f64,
}

#[derive(Default)]
struct Control {
    worker: Option<Worker>,
    /// Estimator handed back by the last joined thread, with its sample rate.
    spare: Option<(f64, Box<dyn SpectralKeyEstimator>)>,
}

/// Real-time key detector for a live audio stream.
pub struct KeyRecorder {
    config: RecorderConfig,
    factory: EstimatorFactory,
    shared: Arc<LiveKeyState>,
    session: ArcSwapOption<Session>,
    control: Mutex<Control>,
    /// Held by whoever is writing into the session ring.
    producer: AtomicFlag,
    sample_rate: AtomicDouble,
    input_level: AtomicFloat,
    dropped: AtomicU64,
    leaked_threads: AtomicU64,
}

impl KeyRecorder {
    /// Create an idle recorder. Fails if `config` does not validate.
    pub fn new(config: RecorderConfig, factory: EstimatorFactory) -> Result<Self> {
        if let Err(e) = config.validate() {
            tracing::error!("Rejected recorder config: {}", e);
            return Err(e);
        }
        Ok(Self {
            shared: Arc::new(LiveKeyState::new(&config)),
            config,
            factory,
            session: ArcSwapOption::empty(),
            control: Mutex::new(Control::default()),
            producer: AtomicFlag::new(false),
            sample_rate: AtomicDouble::new(0.0),
            input_level: AtomicFloat::new(0.0),
            dropped: AtomicU64::new(0),
            leaked_threads: AtomicU64::new(0),
        })
    }

    /// Recorder using the bundled chroma estimator.
    pub fn with_chroma(config: RecorderConfig) -> Result<Self> {
        Self::new(config, chroma_factory())
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Begin a recording session.
    ///
    /// Needs a known sample rate (see [`audio_device_about_to_start`]).
    /// Calling it while already recording does nothing.
    ///
    /// [`audio_device_about_to_start`]: Self::audio_device_about_to_start
    pub fn start(&self) -> Result<()> {
        let mut control = self.control.lock();
        if control.worker.is_some() {
            return Ok(());
        }

        let sample_rate = self.known_sample_rate().ok_or(Error::NoSampleRate)?;

        let estimator = match control.spare.take() {
            Some((rate, mut estimator)) if rate == sample_rate => {
                estimator.reset();
                estimator
            }
            _ => (self.factory)(sample_rate, &self.config),
        };

        let generation = self.shared.begin_session();
        let session = Arc::new(Session::new(self.config.ring_capacity, generation));
        self.input_level.set(0.0);

        let (exited_tx, exited) = crossbeam_channel::bounded::<()>(0);
        let handle = {
            let session = session.clone();
            let shared = self.shared.clone();
            let config = self.config.clone();
            std::thread::Builder::new()
                .name("ear-analysis".into())
                .spawn(move || {
                    let _exited = exited_tx;
                    run_analysis_loop(&session, &shared, &config, sample_rate, estimator)
                })?
        };

        self.session.store(Some(session.clone()));
        control.worker = Some(Worker {
            handle,
            exited,
            session,
            sample_rate,
        });

        tracing::info!(sample_rate, "Key recording started");
        Ok(())
    }

    /// End the recording session.
    ///
    /// Waits at most `stop_timeout` for the analysis thread. On timeout the
    /// thread is abandoned, counted in [`leaked_threads`](Self::leaked_threads),
    /// and [`Error::ShutdownTimeout`] is returned; the recorder is idle either
    /// way. Stopping an idle recorder is a no-op.
    pub fn stop(&self) -> Result<()> {
        let mut control = self.control.lock();
        let Some(worker) = control.worker.take() else {
            return Ok(());
        };

        self.session.store(None);
        worker.session.stop();
        self.wake(&worker.session);

        let timeout = self.config.stop_timeout;
        match worker.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => match worker.handle.join() {
                Ok(estimator) => {
                    control.spare = Some((worker.sample_rate, estimator));
                    tracing::info!("Key recording stopped");
                    Ok(())
                }
                Err(_) => {
                    tracing::error!("Key analysis thread panicked");
                    Err(Error::AnalysisPanicked)
                }
            },
            Err(RecvTimeoutError::Timeout) => {
                let leaked = self.leaked_threads.fetch_add(1, Ordering::AcqRel) + 1;
                let timeout_ms = timeout.as_millis() as u64;
                tracing::warn!(
                    timeout_ms,
                    leaked,
                    "Key analysis thread did not exit in time, detaching it"
                );
                Err(Error::ShutdownTimeout { timeout_ms })
            }
        }
    }

    /// Push one zeroed frame into the stopped session's ring so a loop
    /// waiting for data sees fresh samples. Skipped if the audio callback is
    /// mid-push, which has the same effect.
    fn wake(&self, session: &Session) {
        if self.producer.try_raise() {
            let zeros = vec![0.0f32; self.config.frame_size];
            session.ring.push_mono(&zeros);
            self.producer.set(false);
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.load().is_some()
    }

    /// Frames per forced estimate. 0 pauses estimation.
    pub fn set_compute_frame_count(&self, frames: usize) {
        self.shared.params.set_compute_frame_count(frames);
    }

    pub fn compute_frame_count(&self) -> usize {
        self.shared.params.compute_frame_count()
    }

    /// Change the vote gain. Also wipes the vote pool so the new gain starts
    /// from a clean slate.
    pub fn set_sensitivity(&self, sensitivity: f32) {
        self.shared.params.set_sensitivity(sensitivity.max(0.0));
        self.shared.params.request_clear(None);
    }

    pub fn sensitivity(&self) -> f32 {
        self.shared.params.sensitivity()
    }

    /// Zero the votes of one mode, or all with `None`. Applied by the
    /// analysis thread before its next round.
    pub fn clear_votes(&self, mode: Option<KeyMode>) {
        self.shared.params.request_clear(mode);
    }

    /// Channel woken after every published round. Wake-ups coalesce: a slow
    /// reader sees at most one pending message and should re-read
    /// [`current_estimate`](Self::current_estimate).
    pub fn subscribe(&self) -> Receiver<()> {
        self.shared.subscribe()
    }

    pub fn current_estimate(&self) -> Arc<KeyEstimate> {
        self.shared.estimate()
    }

    /// Feed one device block. Real-time safe: no locks, no allocation.
    ///
    /// Does nothing unless recording with a known sample rate. Tolerates
    /// zero frames, missing channels and channels shorter than `frames`.
    pub fn push_audio(&self, channels: &[&[f32]], frames: usize) {
        if frames == 0 || self.known_sample_rate().is_none() {
            return;
        }
        let session = self.session.load();
        let Some(session) = session.as_deref() else {
            return;
        };

        let mix = self.config.channel_mix;
        let readable = mix.readable_frames(channels, frames);
        if readable == 0 {
            return;
        }
        if !self.producer.try_raise() {
            self.dropped.fetch_add(readable as u64, Ordering::Relaxed);
            return;
        }

        let dropped = session.ring.push(channels, readable, mix);
        self.producer.set(false);

        if dropped > 0 {
            self.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
        }

        let mut sum = 0.0f32;
        for i in 0..readable {
            let s = mix.sample(channels, i);
            sum += s * s;
        }
        let rms = (sum / readable as f32).sqrt();
        self.input_level
            .smooth_toward(rms, self.config.input_level_alpha);
    }

    /// The device is about to deliver audio at `sample_rate`.
    ///
    /// A running session at a different rate is restarted.
    pub fn audio_device_about_to_start(&self, sample_rate: f64) -> Result<()> {
        let previous = self.sample_rate.replace(sample_rate);
        tracing::debug!(sample_rate, previous, "Audio device starting");
        if previous == sample_rate || !self.is_recording() {
            return Ok(());
        }
        let stopped = self.stop();
        let started = self.start();
        stopped.and(started)
    }

    /// The device stopped; `push_audio` ignores blocks until it restarts.
    pub fn audio_device_stopped(&self) {
        self.sample_rate.set(0.0);
        tracing::debug!("Audio device stopped");
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate.get()
    }

    fn known_sample_rate(&self) -> Option<f64> {
        let rate = self.sample_rate.get();
        (rate > 0.0).then_some(rate)
    }

    /// Smoothed RMS of the incoming blocks.
    pub fn input_level(&self) -> f32 {
        self.input_level.get()
    }

    /// Samples lost to ring overflow since the recorder was created.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Analysis threads abandoned by a timed-out `stop()`.
    pub fn leaked_threads(&self) -> u64 {
        self.leaked_threads.load(Ordering::Acquire)
    }

    /// Stabilization rounds published since the recorder was created.
    pub fn rounds(&self) -> u64 {
        self.shared.rounds()
    }
}

impl Drop for KeyRecorder {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::SpectralDescriptors;
    use crate::frame::AudioFrame;
    use crate::key::{Key, PitchClass};
    use approx::assert_relative_eq;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Scripted {
        key: Key,
        frames: usize,
        resets: Arc<AtomicUsize>,
        stall: Option<Duration>,
    }

    impl SpectralKeyEstimator for Scripted {
        fn accumulate(&mut self, _frame: &AudioFrame<'_>) {
            if let Some(stall) = self.stall {
                std::thread::sleep(stall);
            }
            self.frames += 1;
        }

        fn force_finalize(&mut self) -> SpectralDescriptors {
            let seen = std::mem::take(&mut self.frames);
            SpectralDescriptors {
                key: Some(self.key),
                strength: if seen > 0 { 1.0 } else { 0.0 },
                rms: 0.5,
                ..Default::default()
            }
        }

        fn reset(&mut self) {
            self.frames = 0;
            self.resets.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn factory(
        key: Key,
        stall: Option<Duration>,
    ) -> (EstimatorFactory, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let built = Arc::new(AtomicUsize::new(0));
        let resets = Arc::new(AtomicUsize::new(0));
        let f: EstimatorFactory = {
            let (built, resets) = (built.clone(), resets.clone());
            Arc::new(move |_: f64, _: &RecorderConfig| -> Box<dyn SpectralKeyEstimator> {
                built.fetch_add(1, Ordering::Relaxed);
                Box::new(Scripted {
                    key,
                    frames: 0,
                    resets: resets.clone(),
                    stall,
                })
            })
        };
        (f, built, resets)
    }

    fn config() -> RecorderConfig {
        RecorderConfig {
            frame_size: 256,
            hop_size: 128,
            ring_capacity: 8192,
            compute_frame_count: 2,
            high_pass_cutoff: None,
            stop_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    fn tone(len: usize) -> Vec<f32> {
        (0..len).map(|i| (i as f32 * 0.05).sin() * 0.5).collect()
    }

    /// Push `len` samples and wait until round `round` was published.
    fn push_round(recorder: &KeyRecorder, len: usize, round: u64) {
        let block = tone(len);
        recorder.push_audio(&[&block[..]], len);
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while recorder.rounds() < round {
            assert!(std::time::Instant::now() < deadline, "round {round} never came");
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(recorder.rounds(), round);
    }

    /// One round per frame; the first push fills a frame, later pushes add a hop.
    fn recording_per_frame(key: Key) -> KeyRecorder {
        let (f, _, _) = factory(key, None);
        let recorder = KeyRecorder::new(
            RecorderConfig {
                compute_frame_count: 1,
                ..config()
            },
            f,
        )
        .unwrap();
        recorder.audio_device_about_to_start(48000.0).unwrap();
        recorder.start().unwrap();
        push_round(&recorder, 256, 1);
        push_round(&recorder, 128, 2);
        push_round(&recorder, 128, 3);
        // 5, then 0.9 * w - 1 + 5 twice
        assert_relative_eq!(
            recorder.current_estimate().confidence,
            11.65 / 40.0,
            epsilon = 1e-4
        );
        recorder
    }

    #[test]
    fn test_rejects_invalid_config() {
        let bad = RecorderConfig {
            hop_size: 0,
            ..config()
        };
        assert!(matches!(
            KeyRecorder::with_chroma(bad),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_start_needs_sample_rate() {
        let (f, built, _) = factory(Key::major(PitchClass::C), None);
        let recorder = KeyRecorder::new(config(), f).unwrap();
        assert!(matches!(recorder.start(), Err(Error::NoSampleRate)));
        assert!(!recorder.is_recording());
        assert_eq!(built.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_stop_twice_when_idle() {
        let (f, _, _) = factory(Key::major(PitchClass::C), None);
        let recorder = KeyRecorder::new(config(), f).unwrap();
        assert!(recorder.stop().is_ok());
        assert!(recorder.stop().is_ok());
        assert_eq!(recorder.leaked_threads(), 0);
    }

    #[test]
    fn test_push_ignored_outside_recording() {
        let (f, _, _) = factory(Key::major(PitchClass::C), None);
        let recorder = KeyRecorder::new(config(), f).unwrap();
        let block = tone(512);
        recorder.push_audio(&[&block[..]], 512);
        recorder.audio_device_about_to_start(48000.0).unwrap();
        recorder.push_audio(&[&block[..]], 512);
        recorder.push_audio(&[], 512);
        recorder.push_audio(&[&block[..]], 0);
        assert_eq!(recorder.input_level(), 0.0);
        assert_eq!(recorder.dropped_samples(), 0);
    }

    #[test]
    fn test_round_notifications() {
        let key = Key::minor(PitchClass::FSharp);
        let (f, _, _) = factory(key, None);
        let recorder = KeyRecorder::new(config(), f).unwrap();
        let rx = recorder.subscribe();
        recorder.audio_device_about_to_start(48000.0).unwrap();
        recorder.start().unwrap();
        recorder.start().unwrap();
        assert!(recorder.is_recording());

        let block = tone(1024);
        recorder.push_audio(&[&block[..], &block[..]], 1024);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let estimate = recorder.current_estimate();
        assert_eq!(estimate.key, Some(key));
        assert!(estimate.round >= 1);
        assert!(recorder.rounds() >= 1);
        assert!(recorder.input_level() > 0.0);

        recorder.stop().unwrap();
        assert!(!recorder.is_recording());
        assert!(recorder.stop().is_ok());
    }

    #[test]
    fn test_estimator_reused_on_same_rate() {
        let (f, built, resets) = factory(Key::major(PitchClass::D), None);
        let recorder = KeyRecorder::new(config(), f).unwrap();
        recorder.audio_device_about_to_start(44100.0).unwrap();

        recorder.start().unwrap();
        recorder.stop().unwrap();
        recorder.start().unwrap();
        recorder.stop().unwrap();
        assert_eq!(built.load(Ordering::Relaxed), 1);
        assert_eq!(resets.load(Ordering::Relaxed), 1);

        recorder.audio_device_about_to_start(48000.0).unwrap();
        recorder.start().unwrap();
        recorder.stop().unwrap();
        assert_eq!(built.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_rate_change_restarts_session() {
        let (f, built, _) = factory(Key::major(PitchClass::D), None);
        let recorder = KeyRecorder::new(config(), f).unwrap();
        recorder.audio_device_about_to_start(44100.0).unwrap();
        recorder.start().unwrap();

        recorder.audio_device_about_to_start(48000.0).unwrap();
        assert!(recorder.is_recording());
        assert_eq!(built.load(Ordering::Relaxed), 2);

        recorder.audio_device_stopped();
        let block = tone(256);
        recorder.push_audio(&[&block[..]], 256);
        assert_eq!(recorder.input_level(), 0.0);
    }

    #[test]
    fn test_stop_timeout_leaks_thread() {
        let (f, _, _) = factory(
            Key::major(PitchClass::E),
            Some(Duration::from_millis(500)),
        );
        let recorder = KeyRecorder::new(
            RecorderConfig {
                stop_timeout: Duration::from_millis(20),
                ..config()
            },
            f,
        )
        .unwrap();
        recorder.audio_device_about_to_start(48000.0).unwrap();
        recorder.start().unwrap();

        let block = tone(512);
        recorder.push_audio(&[&block[..]], 512);
        std::thread::sleep(Duration::from_millis(50));

        assert!(matches!(
            recorder.stop(),
            Err(Error::ShutdownTimeout { timeout_ms: 20 })
        ));
        assert!(!recorder.is_recording());
        assert_eq!(recorder.leaked_threads(), 1);

        recorder.start().unwrap();
        assert!(recorder.is_recording());
    }

    #[test]
    fn test_leaked_thread_cannot_touch_restarted_session() {
        let (f, _, _) = factory(
            Key::major(PitchClass::E),
            Some(Duration::from_millis(300)),
        );
        let recorder = KeyRecorder::new(
            RecorderConfig {
                compute_frame_count: 1,
                stop_timeout: Duration::from_millis(20),
                ..config()
            },
            f,
        )
        .unwrap();
        recorder.audio_device_about_to_start(48000.0).unwrap();
        recorder.start().unwrap();

        let block = tone(512);
        recorder.push_audio(&[&block[..]], 512);
        std::thread::sleep(Duration::from_millis(50));
        assert!(matches!(
            recorder.stop(),
            Err(Error::ShutdownTimeout { .. })
        ));

        recorder.start().unwrap();
        std::thread::sleep(Duration::from_millis(800));

        let estimate = recorder.current_estimate();
        assert_eq!(estimate.key, None);
        assert_eq!(estimate.round, 0);
        assert_eq!(recorder.rounds(), 0);
    }

    #[test]
    fn test_clear_votes_restarts_accumulation() {
        let key = Key::minor(PitchClass::B);
        let recorder = recording_per_frame(key);

        recorder.clear_votes(None);
        push_round(&recorder, 128, 4);
        let estimate = recorder.current_estimate();
        assert_eq!(estimate.key, Some(key));
        assert_relative_eq!(estimate.confidence, 5.0 / 40.0, epsilon = 1e-4);

        recorder.stop().unwrap();
    }

    #[test]
    fn test_clear_votes_of_other_mode_keeps_weight() {
        let key = Key::minor(PitchClass::B);
        let recorder = recording_per_frame(key);

        recorder.clear_votes(Some(KeyMode::Major));
        push_round(&recorder, 128, 4);
        assert_relative_eq!(
            recorder.current_estimate().confidence,
            (0.9 * 11.65 - 1.0 + 5.0) / 40.0,
            epsilon = 1e-4
        );

        recorder.stop().unwrap();
    }

    #[test]
    fn test_set_sensitivity_clears_and_applies_gain() {
        let key = Key::major(PitchClass::G);
        let recorder = recording_per_frame(key);

        recorder.set_sensitivity(2.0);
        push_round(&recorder, 128, 4);
        let estimate = recorder.current_estimate();
        assert_eq!(estimate.key, Some(key));
        assert_relative_eq!(estimate.confidence, 2.0 / 40.0, epsilon = 1e-4);

        push_round(&recorder, 128, 5);
        assert_relative_eq!(
            recorder.current_estimate().confidence,
            (0.9 * 2.0 - 1.0 + 2.0) / 40.0,
            epsilon = 1e-4
        );

        recorder.stop().unwrap();
    }

    #[test]
    fn test_settings_round_trip() {
        let (f, _, _) = factory(Key::major(PitchClass::C), None);
        let recorder = KeyRecorder::new(config(), f).unwrap();
        recorder.set_compute_frame_count(7);
        recorder.set_sensitivity(-3.0);
        assert_eq!(recorder.compute_frame_count(), 7);
        assert_eq!(recorder.sensitivity(), 0.0);
    }
}
