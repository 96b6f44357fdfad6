//! The signal task: turns orchestrator events into light patterns.
//!
//! A `watch` channel is the single-slot latch the contract asks for: only
//! the most recent event matters, and events are monotonic. The task walks
//! the current pattern step by step; a new event takes over at the next step
//! boundary, except `Error`, which interrupts the running step immediately.
//!
//! When the orchestrator drops its sender the task finishes what it is
//! showing: a finite pattern plays out, a repeating pattern completes its
//! current iteration, then the light goes dark and the task exits.

use std::time::Duration;

use fieldsync_core::{Pattern, PatternCursor, SignalEvent};
use tokio::{sync::watch, time::Instant};

use crate::led::LedBackend;

/// What the step-sleep observed.
struct StepOutcome {
    /// Event that interrupted the step mid-sleep (`Error` only).
    interrupt: Option<SignalEvent>,
    /// The sender dropped; no further events will come.
    closed: bool,
}

/// Drive `backend` from orchestrator events until the channel closes.
pub async fn run_signal_task(
    mut events: watch::Receiver<Option<SignalEvent>>,
    mut backend: Box<dyn LedBackend>,
) {
    let mut current: Option<SignalEvent> = None;
    let mut cursor: Option<PatternCursor> = None;
    // Laps shown when the channel closed; repeating patterns stop one lap
    // after this so the process can exit instead of blinking forever.
    let mut close_laps: Option<usize> = None;

    loop {
        if let Some(event) = *events.borrow_and_update() {
            if current != Some(event) {
                tracing::debug!(?event, "signal pattern change");
                current = Some(event);
                cursor = Some(PatternCursor::new(Pattern::for_event(event)));
            }
        }

        let Some(active) = cursor.as_mut() else {
            // Nothing to show yet; wait for the first event.
            if close_laps.is_some() || events.changed().await.is_err() {
                set_off(backend.as_mut());
                return;
            }
            continue;
        };

        let lap_done = close_laps.is_some_and(|at_close| active.laps() > at_close);
        let step = if lap_done { None } else { active.next_step() };
        let Some(step) = step else {
            set_off(backend.as_mut());
            if close_laps.is_some() {
                return;
            }
            cursor = None;
            continue;
        };

        if let Err(error) = backend.set(step.on) {
            tracing::warn!(%error, "indicator write failed");
        }

        let outcome = wait_step(&mut events, step.duration, close_laps.is_some()).await;
        if outcome.closed && close_laps.is_none() {
            close_laps = Some(cursor.as_ref().map_or(0, PatternCursor::laps));
        }
        if let Some(event) = outcome.interrupt {
            current = Some(event);
            cursor = Some(PatternCursor::new(Pattern::for_event(event)));
        }
    }
}

/// Sleep a step out, watching for interrupting events.
///
/// The step always runs its full duration unless an immediate-supersede
/// event arrives; observing the channel close does not cut the step short.
async fn wait_step(
    events: &mut watch::Receiver<Option<SignalEvent>>,
    duration: Duration,
    closed: bool,
) -> StepOutcome {
    let step_end = Instant::now() + duration;
    let mut closed = closed;
    loop {
        if closed {
            tokio::time::sleep_until(step_end).await;
            return StepOutcome { interrupt: None, closed: true };
        }
        tokio::select! {
            () = tokio::time::sleep_until(step_end) => {
                return StepOutcome { interrupt: None, closed: false };
            },
            changed = events.changed() => match changed {
                Ok(()) => {
                    let latched = *events.borrow();
                    if let Some(event) = latched
                        && event.supersedes_immediately()
                    {
                        return StepOutcome { interrupt: Some(event), closed: false };
                    }
                    // Non-immediate events wait for the step boundary; the
                    // top of the task loop picks them up from the latch.
                },
                Err(_) => closed = true,
            },
        }
    }
}

/// Best-effort off.
fn set_off(backend: &mut dyn LedBackend) {
    if let Err(error) = backend.set(false) {
        tracing::warn!(%error, "indicator write failed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Records every write with a virtual timestamp.
    #[derive(Clone, Default)]
    struct RecordingLed {
        writes: Arc<Mutex<Vec<(Duration, bool)>>>,
        epoch: Option<Instant>,
    }

    impl RecordingLed {
        fn new(epoch: Instant) -> Self {
            Self { writes: Arc::new(Mutex::new(Vec::new())), epoch: Some(epoch) }
        }

        fn writes(&self) -> Vec<(Duration, bool)> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl LedBackend for RecordingLed {
        fn set(&mut self, on: bool) -> std::io::Result<()> {
            let at = self.epoch.map_or(Duration::ZERO, |epoch| Instant::now() - epoch);
            self.writes.lock().unwrap().push((at, on));
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn finite_pattern_plays_out_after_close() {
        let (tx, rx) = watch::channel(None);
        let led = RecordingLed::new(Instant::now());
        let probe = led.clone();
        let task = tokio::spawn(run_signal_task(rx, Box::new(led)));

        tx.send(Some(SignalEvent::Empty)).unwrap();
        drop(tx);
        task.await.unwrap();

        // Two 400ms blinks, then the final off.
        let states: Vec<bool> = probe.writes().iter().map(|(_, on)| *on).collect();
        assert_eq!(states, vec![true, false, true, false, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn error_event_interrupts_immediately() {
        let (tx, rx) = watch::channel(None);
        let led = RecordingLed::new(Instant::now());
        let probe = led.clone();
        let task = tokio::spawn(run_signal_task(rx, Box::new(led)));

        tx.send(Some(SignalEvent::EraseStart)).unwrap();
        // Let the first (800ms on) step begin, then interrupt 100ms in.
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(Some(SignalEvent::Error)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(tx);
        task.await.unwrap();

        let writes = probe.writes();
        // The second write is the SOS's first dot, well before the 800ms
        // erase step would have ended.
        assert!(writes.len() >= 2);
        assert!(writes[1].0 < Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn repeating_pattern_stops_after_final_lap() {
        let (tx, rx) = watch::channel(None);
        let led = RecordingLed::new(Instant::now());
        let probe = led.clone();
        let task = tokio::spawn(run_signal_task(rx, Box::new(led)));

        tx.send(Some(SignalEvent::CopyStart)).unwrap();
        tokio::time::sleep(Duration::from_millis(450)).await;
        drop(tx);

        // Must terminate on its own despite the repeating pattern.
        task.await.unwrap();
        let writes = probe.writes();
        assert_eq!(writes.last().map(|(_, on)| *on), Some(false));
    }
}
