//! Background key analysis fed by the sample ring.
//!
//! The analysis thread drains the session ring into frames, forces an
//! estimate every `compute_frame_count` frames, runs the vote stabilizer and
//! publishes the result via `ArcSwap` for lock-free reads from any thread.

use crate::config::RecorderConfig;
use crate::estimator::{SpectralDescriptors, SpectralKeyEstimator};
use crate::filter::HighPass;
use crate::frame::FrameSource;
use crate::key::{Key, KeyMode};
use crate::votes::{KeyVoteStabilizer, VotePool};
use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use ear_core::{AtomicFlag, AtomicFloat, SampleRing};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

const CLEAR_MAJOR: u8 = 0b01;
const CLEAR_MINOR: u8 = 0b10;

/// Latest stabilized key, published once per round.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct KeyEstimate {
    /// Heaviest key in the vote pool, `None` until any vote was cast.
    pub key: Option<Key>,
    /// Winning vote weight as a share of the cap (0..=1).
    pub confidence: f32,
    /// Raw estimator output of the round that produced this estimate.
    pub descriptors: SpectralDescriptors,
    /// Round number, starting at 1. 0 means nothing was published yet.
    pub round: u64,
}

impl KeyEstimate {
    /// Short key label ("C#m"), empty while no key is known.
    pub fn label(&self) -> String {
        self.key.map(|k| k.label()).unwrap_or_default()
    }
}

/// Parameters the UI may change while the analysis thread runs.
///
/// Read once per round; a change lands on the next round at the latest.
#[derive(Debug)]
pub(crate) struct LiveParams {
    compute_frame_count: AtomicUsize,
    sensitivity: AtomicFloat,
    clear: AtomicU8,
}

impl LiveParams {
    pub(crate) fn new(compute_frame_count: usize, sensitivity: f32) -> Self {
        Self {
            compute_frame_count: AtomicUsize::new(compute_frame_count),
            sensitivity: AtomicFloat::new(sensitivity),
            clear: AtomicU8::new(0),
        }
    }

    pub(crate) fn compute_frame_count(&self) -> usize {
        self.compute_frame_count.load(Ordering::Relaxed)
    }

    pub(crate) fn set_compute_frame_count(&self, frames: usize) {
        self.compute_frame_count.store(frames, Ordering::Relaxed);
    }

    pub(crate) fn sensitivity(&self) -> f32 {
        self.sensitivity.get()
    }

    pub(crate) fn set_sensitivity(&self, sensitivity: f32) {
        self.sensitivity.set(sensitivity);
    }

    pub(crate) fn request_clear(&self, mode: Option<KeyMode>) {
        let bits = match mode {
            Some(KeyMode::Major) => CLEAR_MAJOR,
            Some(KeyMode::Minor) => CLEAR_MINOR,
            None => CLEAR_MAJOR | CLEAR_MINOR,
        };
        self.clear.fetch_or(bits, Ordering::AcqRel);
    }

    /// Apply and consume pending clear requests.
    pub(crate) fn apply_clears(&self, pool: &mut VotePool) {
        match self.clear.swap(0, Ordering::AcqRel) {
            CLEAR_MAJOR => pool.clear(Some(KeyMode::Major)),
            CLEAR_MINOR => pool.clear(Some(KeyMode::Minor)),
            0 => {}
            _ => pool.clear(None),
        }
    }

    fn discard_clears(&self) {
        self.clear.store(0, Ordering::Release);
    }
}

/// State shared between the recorder and its analysis thread.
pub(crate) struct LiveKeyState {
    /// Generation of the current session. Held while publishing or taking
    /// clear requests so a stale session can do neither.
    generation: Mutex<u64>,
    estimate: ArcSwap<KeyEstimate>,
    subscribers: Mutex<Vec<Sender<()>>>,
    rounds: AtomicU64,
    pub(crate) params: LiveParams,
}

impl LiveKeyState {
    pub(crate) fn new(config: &RecorderConfig) -> Self {
        Self {
            generation: Mutex::new(0),
            estimate: ArcSwap::from_pointee(KeyEstimate::default()),
            subscribers: Mutex::new(Vec::new()),
            rounds: AtomicU64::new(0),
            params: LiveParams::new(config.compute_frame_count, config.sensitivity),
        }
    }

    pub(crate) fn estimate(&self) -> Arc<KeyEstimate> {
        self.estimate.load_full()
    }

    pub(crate) fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Acquire)
    }

    pub(crate) fn subscribe(&self) -> Receiver<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Open a new session generation and forget the previous session's
    /// result. Not announced to subscribers.
    pub(crate) fn begin_session(&self) -> u64 {
        let mut generation = self.generation.lock();
        *generation += 1;
        self.params.discard_clears();
        self.estimate.store(Arc::new(KeyEstimate {
            round: self.rounds(),
            ..Default::default()
        }));
        *generation
    }

    /// Apply pending clears to `pool` if `session` is still the live one.
    fn take_clears(&self, session: &Session, pool: &mut VotePool) {
        let generation = self.generation.lock();
        if session.is_current(*generation) {
            self.params.apply_clears(pool);
        }
    }

    /// Publish a round from `session`. Returns `false`, publishing nothing,
    /// once the session was stopped or replaced.
    fn publish(
        &self,
        session: &Session,
        key: Option<Key>,
        confidence: f32,
        descriptors: SpectralDescriptors,
    ) -> bool {
        {
            let generation = self.generation.lock();
            if !session.is_current(*generation) {
                return false;
            }
            let round = self.rounds.fetch_add(1, Ordering::AcqRel) + 1;
            self.estimate.store(Arc::new(KeyEstimate {
                key,
                confidence,
                descriptors,
                round,
            }));
        }
        self.notify();
        true
    }

    /// Wake every live subscriber; a pending wake-up is coalesced.
    fn notify(&self) {
        self.subscribers
            .lock()
            .retain(|tx| !matches!(tx.try_send(()), Err(TrySendError::Disconnected(_))));
    }
}

/// One recording session: its own ring, run flag and generation.
///
/// A session outlives `stop()` if the analysis thread does not exit in time,
/// so a restart never shares a ring with a leaked thread, and the leaked
/// thread can no longer publish or take clear requests.
pub(crate) struct Session {
    pub(crate) ring: SampleRing,
    running: AtomicFlag,
    generation: u64,
}

impl Session {
    pub(crate) fn new(ring_capacity: usize, generation: u64) -> Self {
        Self {
            ring: SampleRing::new(ring_capacity),
            running: AtomicFlag::new(true),
            generation,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.is_running()
    }

    pub(crate) fn stop(&self) {
        self.running.set(false);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.get()
    }
}

/// Run the analysis loop until `session.stop()` is called.
///
/// Returns the estimator so the next session can reuse it.
pub(crate) fn run_analysis_loop(
    session: &Session,
    shared: &LiveKeyState,
    config: &RecorderConfig,
    sample_rate: f64,
    mut estimator: Box<dyn SpectralKeyEstimator>,
) -> Box<dyn SpectralKeyEstimator> {
    let mut frames = FrameSource::new(config.frame_size, config.hop_size, config.silence_threshold);
    if let Some(cutoff) = config.high_pass_cutoff {
        frames = frames.with_high_pass(HighPass::new(cutoff, sample_rate));
    }
    let stabilizer = KeyVoteStabilizer::new(config.votes);
    let mut pool = VotePool::new();
    let mut since_estimate = 0usize;

    tracing::debug!(sample_rate, "key analysis loop started");

    while session.is_running() {
        shared.take_clears(session, &mut pool);

        if frames.fill_from(&session.ring) == 0 {
            std::thread::sleep(config.idle_sleep);
            continue;
        }

        while let Some(frame) = frames.next_frame() {
            estimator.accumulate(&frame);
            since_estimate += 1;

            let every = shared.params.compute_frame_count();
            if every == 0 || since_estimate < every {
                continue;
            }
            since_estimate = 0;
            if !session.is_running() {
                break;
            }

            let descriptors = estimator.force_finalize();
            shared.take_clears(session, &mut pool);
            stabilizer.decay(&mut pool);
            let voted = stabilizer.vote(&mut pool, &descriptors, shared.params.sensitivity());
            let (key, confidence) = match pool.resolve() {
                Some((key, weight)) => (Some(key), stabilizer.confidence(weight)),
                None => (None, 0.0),
            };

            tracing::trace!(
                voted,
                guess = %descriptors.key_label(),
                strength = descriptors.strength,
                key = ?key,
                confidence,
                "key round"
            );
            if !shared.publish(session, key, confidence, descriptors) {
                break;
            }
        }
    }

    tracing::debug!("key analysis loop finished");
    estimator
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::AudioFrame;
    use crate::key::PitchClass;
    use std::time::Duration;

    /// Reports a fixed key for every window that saw a loud frame.
    struct FixedKey {
        key: Key,
        loud: bool,
    }

    impl SpectralKeyEstimator for FixedKey {
        fn accumulate(&mut self, frame: &AudioFrame<'_>) {
            self.loud |= !frame.is_silent();
        }

        fn force_finalize(&mut self) -> SpectralDescriptors {
            let loud = core::mem::take(&mut self.loud);
            SpectralDescriptors {
                key: loud.then_some(self.key),
                strength: if loud { 1.0 } else { 0.0 },
                rms: if loud { 0.5 } else { 0.0 },
                ..Default::default()
            }
        }

        fn reset(&mut self) {
            self.loud = false;
        }
    }

    fn small_config() -> RecorderConfig {
        RecorderConfig {
            frame_size: 256,
            hop_size: 128,
            ring_capacity: 4096,
            compute_frame_count: 2,
            high_pass_cutoff: None,
            ..Default::default()
        }
    }

    #[test]
    fn test_params_clear_bits() {
        let params = LiveParams::new(4, 1.0);
        let mut pool = VotePool::new();
        let stabilizer = KeyVoteStabilizer::new(Default::default());
        let loud = |key| SpectralDescriptors {
            key: Some(key),
            strength: 1.0,
            rms: 1.0,
            ..Default::default()
        };
        stabilizer.vote(&mut pool, &loud(Key::major(PitchClass::C)), 3.0);
        stabilizer.vote(&mut pool, &loud(Key::minor(PitchClass::C)), 2.0);

        params.request_clear(Some(KeyMode::Major));
        params.apply_clears(&mut pool);
        assert_eq!(pool.weight(Key::major(PitchClass::C)), 0.0);
        assert_eq!(pool.weight(Key::minor(PitchClass::C)), 2.0);

        params.request_clear(Some(KeyMode::Major));
        params.request_clear(Some(KeyMode::Minor));
        params.apply_clears(&mut pool);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_subscribers_coalesce_and_prune() {
        let state = LiveKeyState::new(&small_config());
        let session = Session::new(64, state.begin_session());
        let rx = state.subscribe();
        let dropped = state.subscribe();
        drop(dropped);

        assert!(state.publish(&session, None, 0.0, SpectralDescriptors::default()));
        assert!(state.publish(&session, None, 0.0, SpectralDescriptors::default()));
        assert_eq!(state.subscribers.lock().len(), 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert_eq!(state.rounds(), 2);
        assert_eq!(state.estimate().round, 2);
    }

    #[test]
    fn test_loop_publishes_rounds() {
        let config = small_config();
        let shared = Arc::new(LiveKeyState::new(&config));
        let session = Arc::new(Session::new(config.ring_capacity, shared.begin_session()));
        let rx = shared.subscribe();

        let handle = {
            let (session, shared, config) = (session.clone(), shared.clone(), config.clone());
            std::thread::spawn(move || {
                let estimator = Box::new(FixedKey {
                    key: Key::minor(PitchClass::E),
                    loud: false,
                });
                run_analysis_loop(&session, &shared, &config, 48000.0, estimator)
            })
        };

        let tone: Vec<f32> = (0..1024).map(|i| (i as f32 * 0.1).sin() * 0.5).collect();
        session.ring.push_mono(&tone);

        rx.recv_timeout(Duration::from_secs(5))
            .expect("no round published");
        let estimate = shared.estimate();
        assert_eq!(estimate.key, Some(Key::minor(PitchClass::E)));
        assert!(estimate.confidence > 0.0);
        assert_eq!(estimate.label(), "Em");

        session.stop();
        let _estimator = handle.join().expect("analysis thread panicked");
    }

    #[test]
    fn test_loop_exits_on_stop_with_empty_ring() {
        let config = small_config();
        let shared = Arc::new(LiveKeyState::new(&config));
        let session = Arc::new(Session::new(config.ring_capacity, shared.begin_session()));

        let handle = {
            let (session, shared, config) = (session.clone(), shared.clone(), config.clone());
            std::thread::spawn(move || {
                let estimator = Box::new(FixedKey {
                    key: Key::major(PitchClass::C),
                    loud: false,
                });
                run_analysis_loop(&session, &shared, &config, 48000.0, estimator)
            })
        };
        std::thread::sleep(Duration::from_millis(10));
        session.stop();
        handle.join().expect("analysis thread panicked");
        assert_eq!(shared.rounds(), 0);
    }

    #[test]
    fn test_begin_session_resets_estimate() {
        let state = LiveKeyState::new(&small_config());
        let session = Session::new(64, state.begin_session());
        state.publish(
            &session,
            Some(Key::major(PitchClass::G)),
            0.5,
            SpectralDescriptors::default(),
        );
        state.begin_session();
        let estimate = state.estimate();
        assert_eq!(estimate.key, None);
        assert_eq!(estimate.round, 1);
    }

    #[test]
    fn test_replaced_session_cannot_publish_or_take_clears() {
        let state = LiveKeyState::new(&small_config());
        let old = Session::new(64, state.begin_session());
        let current = Session::new(64, state.begin_session());

        assert!(!state.publish(
            &old,
            Some(Key::major(PitchClass::D)),
            1.0,
            SpectralDescriptors::default(),
        ));
        assert_eq!(state.rounds(), 0);
        assert_eq!(state.estimate().key, None);

        let stabilizer = KeyVoteStabilizer::new(Default::default());
        let loud = SpectralDescriptors {
            key: Some(Key::minor(PitchClass::A)),
            strength: 1.0,
            rms: 1.0,
            ..Default::default()
        };
        let mut old_pool = VotePool::new();
        let mut pool = VotePool::new();
        stabilizer.vote(&mut old_pool, &loud, 2.0);
        stabilizer.vote(&mut pool, &loud, 2.0);

        state.params.request_clear(None);
        state.take_clears(&old, &mut old_pool);
        assert!(!old_pool.is_empty());
        state.take_clears(&current, &mut pool);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_stopped_session_cannot_publish() {
        let state = LiveKeyState::new(&small_config());
        let session = Session::new(64, state.begin_session());
        session.stop();
        assert!(!state.publish(&session, None, 0.0, SpectralDescriptors::default()));
        assert_eq!(state.rounds(), 0);
    }
}
