//! Pairing-button gesture engine and its polling worker.
//!
//! ## Hardware
//!
//! Active-low momentary switch with internal pull-up. The GPIO fires on
//! any edge; the ISR only raises [`BUTTON_EDGE`](crate::events::BUTTON_EDGE)
//! so the worker wakes early. All debouncing and classification happens
//! in [`GestureEngine::poll`], which is pure and driven by `(level, now)`.
//!
//! ## Gestures
//!
//! | Event             | Condition                                          |
//! |-------------------|----------------------------------------------------|
//! | `Press`           | level steady-pressed for 50 ms                     |
//! | `Hold3s`          | still pressed 3 000 ms after `Press`               |
//! | `Hold10s`         | still pressed 10 000 ms after `Press`              |
//! | `Release`         | level steady-released for 50 ms                    |
//! | `ReleaseAfter3s`  | `Release` whose press reached `Hold3s` only        |
//! | `ReleaseAfter10s` | `Release` whose press reached `Hold10s`            |
//!
//! `Hold10s` always follows `Hold3s` within the same press; when a single
//! poll crosses both thresholds the two are emitted together, in order.
//!
//! ## Polling cadence
//!
//! While the engine is idle (released, stable, past debounce + margin)
//! the worker sleeps 1 s between polls; otherwise 50 ms. Edges cut either
//! wait short through the signal bridge.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::digital::InputPin;
use heapless::Vec;
use log::{debug, info, warn};

use crate::app::ports::WorkerControl;
use crate::events::WakeSignal;

pub const DEBOUNCE_MS: u32 = 50;
pub const HOLD_SHORT_MS: u32 = 3_000;
pub const HOLD_LONG_MS: u32 = 10_000;
const IDLE_MARGIN_MS: u32 = 50;

/// Poll period while a gesture may be in progress.
pub const FAST_POLL_MS: u32 = 50;
/// Poll period while idle.
pub const SLOW_POLL_MS: u32 = 1_000;

/// Classified button events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    Press,
    Release,
    Hold3s,
    Hold10s,
    ReleaseAfter3s,
    ReleaseAfter10s,
}

/// Coarse engine state, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GesturePhase {
    Released,
    Debouncing,
    Pressed,
    Held3s,
    Held10s,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HoldMark {
    None,
    Short,
    Long,
}

/// Events produced by one poll. A release can produce two.
pub type Events = Vec<ButtonEvent, 2>;

/// Debounce + hold classifier for one active-low button.
#[derive(Debug, Clone)]
pub struct GestureEngine {
    raw: bool,
    steady: bool,
    last_edge_ms: u32,
    press_start_ms: u32,
    hold: HoldMark,
}

impl Default for GestureEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl GestureEngine {
    pub const fn new() -> Self {
        Self {
            raw: false,
            steady: false,
            last_edge_ms: 0,
            press_start_ms: 0,
            hold: HoldMark::None,
        }
    }

    /// Start over from "released". A button that is physically held at
    /// this point is reported as a fresh `Press` once it passes debounce.
    pub fn reset(&mut self, now_ms: u32) {
        *self = Self::new();
        self.last_edge_ms = now_ms;
    }

    /// Feed one sample. `pressed` is the raw (undebounced) level.
    pub fn poll(&mut self, pressed: bool, now_ms: u32) -> Events {
        let mut out = Events::new();

        if pressed != self.raw {
            self.raw = pressed;
            self.last_edge_ms = now_ms;
        }

        let stable = now_ms.wrapping_sub(self.last_edge_ms) >= DEBOUNCE_MS;
        if stable && self.raw != self.steady {
            self.steady = self.raw;
            if self.steady {
                self.press_start_ms = now_ms;
                self.hold = HoldMark::None;
                let _ = out.push(ButtonEvent::Press);
            } else {
                let _ = out.push(ButtonEvent::Release);
                match self.hold {
                    HoldMark::Short => {
                        let _ = out.push(ButtonEvent::ReleaseAfter3s);
                    }
                    HoldMark::Long => {
                        let _ = out.push(ButtonEvent::ReleaseAfter10s);
                    }
                    HoldMark::None => {}
                }
                self.hold = HoldMark::None;
            }
            return out;
        }

        if self.steady {
            let held = now_ms.wrapping_sub(self.press_start_ms);
            if held >= HOLD_SHORT_MS && self.hold == HoldMark::None {
                self.hold = HoldMark::Short;
                let _ = out.push(ButtonEvent::Hold3s);
            }
            if held >= HOLD_LONG_MS && self.hold == HoldMark::Short {
                self.hold = HoldMark::Long;
                let _ = out.push(ButtonEvent::Hold10s);
            }
        }
        out
    }

    /// Released, physically stable, and past debounce plus a margin.
    pub fn is_idle(&self, now_ms: u32) -> bool {
        !self.steady
            && !self.raw
            && now_ms.wrapping_sub(self.last_edge_ms) > DEBOUNCE_MS + IDLE_MARGIN_MS
    }

    /// Debounced level.
    pub fn is_pressed(&self) -> bool {
        self.steady
    }

    pub fn phase(&self) -> GesturePhase {
        if self.raw != self.steady {
            return GesturePhase::Debouncing;
        }
        match (self.steady, self.hold) {
            (false, _) => GesturePhase::Released,
            (true, HoldMark::None) => GesturePhase::Pressed,
            (true, HoldMark::Short) => GesturePhase::Held3s,
            (true, HoldMark::Long) => GesturePhase::Held10s,
        }
    }
}

// ── Worker ────────────────────────────────────────────────────

/// Shared run/park switch for the button worker.
pub struct ButtonControl {
    gpio: i32,
    active: AtomicBool,
    rearm: AtomicBool,
    edge: &'static WakeSignal,
}

impl ButtonControl {
    pub fn new(gpio: i32, edge: &'static WakeSignal) -> Self {
        Self {
            gpio,
            active: AtomicBool::new(true),
            rearm: AtomicBool::new(true),
            edge,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl WorkerControl for ButtonControl {
    fn resume(&self) {
        self.rearm.store(true, Ordering::Release);
        self.active.store(true, Ordering::Release);
        crate::drivers::gpio::set_irq_enabled(self.gpio, true);
        self.edge.raise();
        info!("Button: worker resumed");
    }

    fn suspend(&self) {
        self.active.store(false, Ordering::Release);
        crate::drivers::gpio::set_irq_enabled(self.gpio, false);
        info!("Button: worker suspended");
    }
}

/// Reads the line, runs the engine and hands events to `on_event`.
pub struct ButtonWorker<P, F> {
    pin: P,
    engine: GestureEngine,
    control: Arc<ButtonControl>,
    on_event: F,
}

impl<P, F> ButtonWorker<P, F>
where
    P: InputPin,
    F: FnMut(ButtonEvent),
{
    pub fn new(pin: P, control: Arc<ButtonControl>, on_event: F) -> Self {
        Self {
            pin,
            engine: GestureEngine::new(),
            control,
            on_event,
        }
    }

    /// One poll. Returns how long to wait before the next one.
    pub fn step(&mut self, now_ms: u32) -> u32 {
        if !self.control.is_active() {
            return SLOW_POLL_MS;
        }
        if self.control.rearm.swap(false, Ordering::AcqRel) {
            self.engine.reset(now_ms);
        }

        let pressed = match self.pin.is_low() {
            Ok(level) => level,
            Err(_) => {
                warn!("Button: line read failed");
                false
            }
        };

        for event in self.engine.poll(pressed, now_ms) {
            debug!("Button: {:?}", event);
            (self.on_event)(event);
        }

        if self.engine.is_idle(now_ms) {
            SLOW_POLL_MS
        } else {
            FAST_POLL_MS
        }
    }

    pub fn engine(&self) -> &GestureEngine {
        &self.engine
    }

    /// Worker body: poll, then sleep until the next tick or an edge.
    pub fn run(mut self, clock: impl Fn() -> u32) -> ! {
        self.control.edge.bind_current();
        loop {
            let wait_ms = self.step(clock());
            self.control.edge.wait(wait_ms);
        }
    }
}
