//! Streaming PCM playback engine.
//!
//! ## Scheduling discipline (per chunk)
//!
//! ```text
//! 1. Chunk arrives (any state) → appended to the session buffer
//! 2. If Playing: clamp scheduled_until forward to the device clock
//!    (underrun → accept a gap rather than schedule in the past)
//! 3. Schedule the chunk at scheduled_until on the sink
//! 4. scheduled_until += chunk duration (samples / 24 000)
//! ```
//!
//! One cursor, advanced after every scheduled chunk, is what makes
//! irregular network arrivals play back as a single gapless waveform:
//! chunks land back-to-back in arrival order, with no overlap, and with
//! the smallest possible gap under jitter.
//!
//! Pausing stops step 2-4, not step 1 — chunks keep accumulating and are
//! scheduled on resume, in order, exactly once. Audio already handed to
//! the device is not truncated by pause; `reset()` is the only way to
//! discard buffered, unplayed chunks.
//!
//! All state mutation happens synchronously in the caller's task; the
//! engine is single-owner and keeps no background thread of its own.

pub mod resample;
pub mod sink;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::chunk::PcmChunk;
use crate::events::{PlaybackState, PlaybackStatusEvent};
use sink::AudioSink;

/// Broadcast capacity for status events; transitions are rare, so a
/// small buffer is plenty for slow subscribers.
const STATUS_CAP: usize = 64;

/// One continuous utterance: buffered chunks plus the scheduling cursor.
///
/// Owns its [`AudioSink`] exclusively — two concurrent players are two
/// engines with two sinks and independent cursors.
pub struct PlaybackEngine {
    sink: Box<dyn AudioSink>,
    /// Session buffer; insertion order = arrival order = playback order.
    chunks: Vec<PcmChunk>,
    /// Index of the first chunk not yet handed to the sink. Everything
    /// before it has been scheduled exactly once.
    next_unscheduled: usize,
    state: PlaybackState,
    /// Device-clock time (seconds) where the next chunk must begin.
    /// Never moves backward, never sits behind the device clock when a
    /// chunk is scheduled.
    scheduled_until: f64,
    muted: bool,
    status_tx: broadcast::Sender<PlaybackStatusEvent>,
    seq: u64,
}

impl PlaybackEngine {
    /// Create an engine around an already-opened sink.
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        let scheduled_until = sink.clock();
        let (status_tx, _) = broadcast::channel(STATUS_CAP);
        Self {
            sink,
            chunks: Vec::new(),
            next_unscheduled: 0,
            state: PlaybackState::Idle,
            scheduled_until,
            muted: false,
            status_tx,
            seq: 0,
        }
    }

    /// Create an engine on the default output device.
    ///
    /// # Errors
    /// Fails fast when no output device is available — fatal for the
    /// session, no degraded fallback.
    #[cfg(feature = "audio-cpal")]
    pub fn open_default() -> crate::error::Result<Self> {
        Ok(Self::new(Box::new(sink::CpalSink::open_default()?)))
    }

    /// Create an engine on a named output device, falling back to the
    /// default when the name does not resolve.
    #[cfg(feature = "audio-cpal")]
    pub fn open_with_preference(preferred_device_name: Option<&str>) -> crate::error::Result<Self> {
        Ok(Self::new(Box::new(sink::CpalSink::open_with_preference(
            preferred_device_name,
        )?)))
    }

    /// Subscribe to play/pause transitions.
    pub fn subscribe_status(&self) -> broadcast::Receiver<PlaybackStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Discard the session: clear the buffer, re-anchor the cursor to the
    /// device clock, return to Idle. Mute is caller-controlled and
    /// survives. Safe to call repeatedly.
    ///
    /// Audio already handed to the device finishes naturally; this stops
    /// any further scheduling, which is the engine's form of cancellation.
    pub fn reset(&mut self) {
        let discarded = self.chunks.len() - self.next_unscheduled;
        if discarded > 0 {
            debug!(discarded, "reset discarding unplayed chunks");
        }
        self.chunks.clear();
        self.next_unscheduled = 0;
        self.scheduled_until = self.sink.clock();
        self.state = PlaybackState::Idle;
        self.notify(false);
    }

    /// Append a chunk to the session. Scheduled immediately if and only
    /// if the engine is Playing; otherwise it waits for
    /// [`start_playback`](Self::start_playback).
    ///
    /// Zero-length chunks are silently dropped.
    pub fn add_chunk(&mut self, chunk: PcmChunk) {
        if chunk.is_empty() {
            return;
        }
        self.chunks.push(chunk);
        if self.state == PlaybackState::Playing {
            self.schedule_pending();
        }
    }

    /// Idle/Paused → Playing. Re-anchors the cursor, then schedules every
    /// buffered-but-unplayed chunk back-to-back. No-op while Playing.
    pub fn start_playback(&mut self) {
        match self.state {
            PlaybackState::Playing => {}
            PlaybackState::Idle | PlaybackState::Paused => {
                // Re-anchor so a long idle/pause cannot leave the cursor
                // in the past; max() keeps it monotonic when audio from
                // before a quick pause is still in flight.
                self.scheduled_until = self.sink.clock().max(self.scheduled_until);
                self.state = PlaybackState::Playing;
                self.schedule_pending();
                self.notify(true);
            }
        }
    }

    /// Playing → Paused; no-op otherwise. Stops scheduling new chunks —
    /// audio already queued on the device finishes naturally.
    pub fn pause_playback(&mut self) {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
            self.notify(false);
        }
    }

    /// Start when Idle or Paused, pause when Playing.
    pub fn toggle_playback(&mut self) {
        if self.state == PlaybackState::Playing {
            self.pause_playback();
        } else {
            self.start_playback();
        }
    }

    /// Mute/unmute the output device. Orthogonal to the transport state:
    /// scheduling and the cursor are unaffected, and no status event is
    /// emitted.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.sink.set_muted(muted);
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Number of chunks buffered in the session (played and unplayed).
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Number of buffered chunks not yet handed to the sink.
    pub fn pending_chunks(&self) -> usize {
        self.chunks.len() - self.next_unscheduled
    }

    /// Device-clock end of already-scheduled audio (seconds).
    pub fn scheduled_until(&self) -> f64 {
        self.scheduled_until
    }

    /// Current device-clock time (seconds).
    pub fn clock(&self) -> f64 {
        self.sink.clock()
    }

    /// True once every scheduled sample has been rendered.
    pub fn is_drained(&self) -> bool {
        self.sink.clock() >= self.scheduled_until
    }

    /// Hand every unscheduled chunk to the sink, advancing the cursor.
    fn schedule_pending(&mut self) {
        while self.next_unscheduled < self.chunks.len() {
            let chunk = &self.chunks[self.next_unscheduled];
            let now = self.sink.clock();
            if self.scheduled_until < now {
                // Underrun: the network fell behind real time. Clamp
                // forward — the audio API rejects starts in the past.
                debug!(
                    behind = now - self.scheduled_until,
                    "underrun — clamping schedule cursor to device clock"
                );
                self.scheduled_until = now;
            }
            self.sink.schedule_at(self.scheduled_until, &chunk.to_f32());
            self.scheduled_until += chunk.duration_secs();
            self.next_unscheduled += 1;
        }
    }

    fn notify(&mut self, playing: bool) {
        let event = PlaybackStatusEvent {
            seq: self.seq,
            playing,
            state: self.state,
        };
        self.seq += 1;
        // Send fails only when no subscriber exists; transitions are
        // valid without observers.
        let _ = self.status_tx.send(event);
        info!(playing, state = ?self.state, "playback transition");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::chunk::SAMPLE_RATE;

    /// Manually-clocked sink recording every schedule call.
    #[derive(Debug, Default)]
    struct FakeSinkState {
        now: f64,
        scheduled: Vec<(f64, usize)>,
        muted: bool,
    }

    struct FakeSink {
        state: Rc<RefCell<FakeSinkState>>,
    }

    impl FakeSink {
        fn new() -> (Self, Rc<RefCell<FakeSinkState>>) {
            let state = Rc::new(RefCell::new(FakeSinkState::default()));
            (
                Self {
                    state: Rc::clone(&state),
                },
                state,
            )
        }
    }

    impl AudioSink for FakeSink {
        fn clock(&self) -> f64 {
            self.state.borrow().now
        }

        fn schedule_at(&mut self, start_secs: f64, samples: &[f32]) {
            self.state
                .borrow_mut()
                .scheduled
                .push((start_secs, samples.len()));
        }

        fn set_muted(&mut self, muted: bool) {
            self.state.borrow_mut().muted = muted;
        }
    }

    fn engine_with_sink() -> (PlaybackEngine, Rc<RefCell<FakeSinkState>>) {
        let (sink, state) = FakeSink::new();
        (PlaybackEngine::new(Box::new(sink)), state)
    }

    /// A chunk of `ms` milliseconds at the engine rate.
    fn chunk_ms(ms: u64) -> PcmChunk {
        let samples = (SAMPLE_RATE as u64 * ms / 1000) as usize;
        PcmChunk::new(vec![100i16; samples])
    }

    #[test]
    fn chunks_added_while_playing_schedule_back_to_back() {
        let (mut engine, sink) = engine_with_sink();
        engine.start_playback();

        engine.add_chunk(chunk_ms(100));
        engine.add_chunk(chunk_ms(250));
        engine.add_chunk(chunk_ms(40));

        let scheduled = sink.borrow().scheduled.clone();
        assert_eq!(scheduled.len(), 3);
        assert_eq!(scheduled[0].0, 0.0);
        assert!((scheduled[1].0 - 0.100).abs() < 1e-9);
        assert!((scheduled[2].0 - 0.350).abs() < 1e-9);
        assert!((engine.scheduled_until() - 0.390).abs() < 1e-9);
    }

    #[test]
    fn start_from_idle_schedules_all_buffered_chunks_in_order() {
        let (mut engine, sink) = engine_with_sink();
        engine.add_chunk(chunk_ms(10));
        engine.add_chunk(chunk_ms(20));
        assert!(sink.borrow().scheduled.is_empty(), "idle must not schedule");

        engine.start_playback();

        let scheduled = sink.borrow().scheduled.clone();
        assert_eq!(scheduled.len(), 2);
        assert_eq!(scheduled[0].1, 240);
        assert_eq!(scheduled[1].1, 480);
        assert!((scheduled[1].0 - 0.010).abs() < 1e-9);
    }

    #[test]
    fn pause_defers_scheduling_not_storage() {
        let (mut engine, sink) = engine_with_sink();
        engine.start_playback();
        engine.add_chunk(chunk_ms(100));
        engine.pause_playback();

        let cursor_at_pause = engine.scheduled_until();
        engine.add_chunk(chunk_ms(50));
        engine.add_chunk(chunk_ms(60));

        assert_eq!(engine.chunk_count(), 3);
        assert_eq!(engine.pending_chunks(), 2);
        assert_eq!(sink.borrow().scheduled.len(), 1, "paused chunks unscheduled");
        assert_eq!(engine.scheduled_until(), cursor_at_pause);

        engine.start_playback();
        assert_eq!(engine.pending_chunks(), 0);
        let scheduled = sink.borrow().scheduled.clone();
        assert_eq!(scheduled.len(), 3, "exactly the unplayed chunks resume");
        // 50 ms then 60 ms, in arrival order.
        assert_eq!(scheduled[1].1, 1200);
        assert_eq!(scheduled[2].1, 1440);
    }

    #[test]
    fn no_chunk_is_scheduled_twice_across_pause_resume_cycles() {
        let (mut engine, sink) = engine_with_sink();
        engine.start_playback();
        engine.add_chunk(chunk_ms(10));
        engine.pause_playback();
        engine.start_playback();
        engine.pause_playback();
        engine.start_playback();

        assert_eq!(sink.borrow().scheduled.len(), 1);
    }

    #[test]
    fn underrun_clamps_cursor_to_device_clock() {
        let (mut engine, sink) = engine_with_sink();
        engine.start_playback();
        engine.add_chunk(chunk_ms(100));
        assert!((engine.scheduled_until() - 0.100).abs() < 1e-9);

        // Network stall: the clock runs 500 ms past the scheduled end.
        sink.borrow_mut().now = 0.600;
        engine.add_chunk(chunk_ms(100));

        let scheduled = sink.borrow().scheduled.clone();
        assert_eq!(scheduled[1].0, 0.600, "late chunk starts at now, not at the stale cursor");
        assert!((engine.scheduled_until() - 0.700).abs() < 1e-9);
    }

    #[test]
    fn resume_after_long_pause_reanchors_to_now() {
        let (mut engine, sink) = engine_with_sink();
        engine.start_playback();
        engine.add_chunk(chunk_ms(100));
        engine.pause_playback();
        engine.add_chunk(chunk_ms(100));

        sink.borrow_mut().now = 5.0;
        engine.start_playback();

        let scheduled = sink.borrow().scheduled.clone();
        assert_eq!(scheduled[1].0, 5.0, "no instant catch-up at the stale cursor");
    }

    #[test]
    fn resume_while_tail_in_flight_does_not_rewind_cursor() {
        let (mut engine, sink) = engine_with_sink();
        engine.start_playback();
        engine.add_chunk(chunk_ms(1000));
        engine.pause_playback();

        // Quick resume: only 200 ms of the in-flight second has rendered.
        sink.borrow_mut().now = 0.2;
        engine.start_playback();
        engine.add_chunk(chunk_ms(100));

        let scheduled = sink.borrow().scheduled.clone();
        assert!((scheduled[1].0 - 1.0).abs() < 1e-9, "cursor must not move backward");
    }

    #[test]
    fn reset_clears_buffer_and_is_idempotent() {
        let (mut engine, sink) = engine_with_sink();
        engine.add_chunk(chunk_ms(10));
        engine.start_playback();
        sink.borrow_mut().now = 1.5;

        engine.reset();
        assert_eq!(engine.state(), PlaybackState::Idle);
        assert_eq!(engine.chunk_count(), 0);
        assert_eq!(engine.scheduled_until(), 1.5);

        engine.reset();
        assert_eq!(engine.state(), PlaybackState::Idle);
        assert_eq!(engine.chunk_count(), 0);
    }

    #[test]
    fn reset_preserves_mute() {
        let (mut engine, sink) = engine_with_sink();
        engine.set_muted(true);
        engine.reset();
        assert!(engine.is_muted());
        assert!(sink.borrow().muted);
    }

    #[test]
    fn mute_is_orthogonal_to_state_and_cursor() {
        let (mut engine, sink) = engine_with_sink();
        engine.start_playback();
        engine.add_chunk(chunk_ms(100));
        let cursor = engine.scheduled_until();

        engine.set_muted(true);
        assert_eq!(engine.state(), PlaybackState::Playing);
        assert_eq!(engine.scheduled_until(), cursor);
        assert!(sink.borrow().muted);

        engine.set_muted(false);
        assert!(!sink.borrow().muted);
        assert_eq!(engine.state(), PlaybackState::Playing);
    }

    #[test]
    fn empty_chunks_are_silently_dropped() {
        let (mut engine, sink) = engine_with_sink();
        engine.start_playback();
        engine.add_chunk(PcmChunk::new(vec![]));
        assert_eq!(engine.chunk_count(), 0);
        assert!(sink.borrow().scheduled.is_empty());
    }

    #[test]
    fn pause_from_idle_is_a_no_op() {
        let (mut engine, _sink) = engine_with_sink();
        let mut rx = engine.subscribe_status();
        engine.pause_playback();
        assert_eq!(engine.state(), PlaybackState::Idle);
        assert!(rx.try_recv().is_err(), "no transition, no event");
    }

    #[test]
    fn toggle_cycles_through_states() {
        let (mut engine, _sink) = engine_with_sink();
        engine.toggle_playback();
        assert_eq!(engine.state(), PlaybackState::Playing);
        engine.toggle_playback();
        assert_eq!(engine.state(), PlaybackState::Paused);
        engine.toggle_playback();
        assert_eq!(engine.state(), PlaybackState::Playing);
    }

    #[test]
    fn observer_sees_every_transition_in_order() {
        let (mut engine, _sink) = engine_with_sink();
        let mut rx = engine.subscribe_status();

        engine.start_playback();
        engine.pause_playback();
        engine.start_playback();
        engine.reset();

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        let playing: Vec<bool> = events.iter().map(|e| e.playing).collect();
        assert_eq!(playing, vec![true, false, true, false]);
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
        assert_eq!(events[3].state, PlaybackState::Idle);
    }

    #[test]
    fn start_while_playing_is_a_no_op() {
        let (mut engine, sink) = engine_with_sink();
        engine.add_chunk(chunk_ms(10));
        engine.start_playback();
        engine.start_playback();
        assert_eq!(sink.borrow().scheduled.len(), 1);
    }
}
