//! Fixed-tick-rate frame timer with server-driven tick-length nudges.
//!
//! Wall-clock frame deltas accumulate into a budget; a frame executes zero
//! or many ticks until the budget drops below one tick length. The server
//! can apply a temporary signed delta to the tick length — on itself, or on
//! a client via SET_TICK_LENGTH — to pull a drifting clock back into sync.

use std::time::{Duration, Instant};

use log::info;

/// Nominal tick length (~60 Hz).
pub const TICK_LENGTH_MICROSECONDS: i64 = 16_667;

/// Floor for the effective tick length so a hostile or buggy delta can
/// never make the tick loop spin forever.
const MIN_TICK_LENGTH_MICROSECONDS: i64 = 1_000;

#[derive(Debug)]
pub struct FrameTimer {
    tick_length_delta_us: i64,
    tick_length_delta_end: Instant,
    current_frame: Instant,
    current_tick: Instant,
    accumulator_us: i64,
    fps_ringbuf: [f32; 64],
    fps_ringbuf_pos: usize,
    pub fps_avg: f32,
    pub paused: bool,
    /// Completed ticks since start, in ticks (the simulation dt unit).
    pub total_time: f32,
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTimer {
    pub fn new() -> Self {
        let now = Instant::now();
        FrameTimer {
            tick_length_delta_us: 0,
            tick_length_delta_end: now,
            current_frame: now,
            current_tick: now,
            accumulator_us: 0,
            fps_ringbuf: [0.0; 64],
            fps_ringbuf_pos: 0,
            fps_avg: 0.0,
            paused: false,
            total_time: 0.0,
        }
    }

    /// Resets the reference instants. Call once right before the main loop.
    pub fn start(&mut self) {
        let now = Instant::now();
        self.current_frame = now;
        self.current_tick = now;
        self.accumulator_us = 0;
    }

    /// Banks the elapsed wall-clock time of the last frame.
    pub fn begin_frame(&mut self) {
        let now = Instant::now();
        let last_frame = now - self.current_frame;
        self.current_frame = now;

        if !self.paused {
            self.accumulator_us += last_frame.as_micros() as i64;
        }

        if self.tick_length_delta_us != 0 && now >= self.tick_length_delta_end {
            self.tick_length_delta_us = 0;
            info!("Tick length delta done");
        }
    }

    /// True once the accumulated budget no longer covers a tick.
    pub fn frame_done(&self) -> bool {
        self.accumulator_us < self.effective_tick_length_us()
    }

    /// Samples the tick rate. Call at the top of every executed tick.
    pub fn begin_tick(&mut self) {
        let now = Instant::now();
        let last_tick_us = (now - self.current_tick).as_micros().max(1) as f32;
        self.current_tick = now;

        self.fps_ringbuf[self.fps_ringbuf_pos] = 1.0e6 / last_tick_us;
        self.fps_ringbuf_pos = (self.fps_ringbuf_pos + 1) % self.fps_ringbuf.len();
        self.fps_avg = self.fps_ringbuf.iter().sum::<f32>() / self.fps_ringbuf.len() as f32;
    }

    /// Consumes one tick worth of budget.
    pub fn advance_tick(&mut self) {
        self.accumulator_us -= self.effective_tick_length_us();
        self.total_time += 1.0;
    }

    pub fn effective_tick_length_us(&self) -> i64 {
        (TICK_LENGTH_MICROSECONDS + self.tick_length_delta_us).max(MIN_TICK_LENGTH_MICROSECONDS)
    }

    /// Applies a bounded, short-lived tick-length adjustment.
    pub fn set_tick_length_delta(&mut self, delta_microseconds: i16, duration_milliseconds: u16) {
        self.tick_length_delta_us = delta_microseconds as i64;
        self.tick_length_delta_end =
            Instant::now() + Duration::from_millis(duration_milliseconds as u64);
    }

    pub fn tick_length_delta_us(&self) -> i64 {
        self.tick_length_delta_us
    }
}
