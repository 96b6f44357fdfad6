//! Operator signal patterns.
//!
//! This module is the pure half of the indicator-light driver: events map to
//! step sequences, and a cursor walks a sequence one `(on, duration)` step at
//! a time. The async task that sleeps between steps and writes to the LED
//! backend lives in `fieldsync-agent`; keeping the timing data pure makes
//! the patterns trivially testable.

use std::time::Duration;

/// Progress events emitted by the orchestrator for the operator light.
///
/// Events are monotonic: the orchestrator only ever emits an event *later*
/// in the run than the previous one, so the current pattern may only be
/// superseded by a later-emitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// Flash copy started.
    CopyStart,
    /// On-disk verification started.
    VerifyStart,
    /// Erase issued, poll running.
    EraseStart,
    /// Sync completed and (if requested) erase confirmed.
    Success,
    /// Flash had no log data; nothing to do.
    Empty,
    /// Unrecoverable failure.
    Error,
}

impl SignalEvent {
    /// Whether this event interrupts the running pattern mid-step.
    ///
    /// Everything except `Error` waits for the next step boundary.
    #[must_use]
    pub fn supersedes_immediately(self) -> bool {
        matches!(self, Self::Error)
    }
}

/// One step of a light pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternStep {
    /// Light on or off for this step.
    pub on: bool,
    /// How long the step lasts.
    pub duration: Duration,
}

/// A full light pattern: a step sequence, optionally repeating.
///
/// Finite patterns end with the light off; the driving task parks the LED
/// off once the cursor is exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    steps: Vec<PatternStep>,
    repeat: bool,
}

/// Morse timing unit for the SOS pattern.
const MORSE_UNIT: Duration = Duration::from_millis(200);

impl Pattern {
    /// The pattern a given event drives.
    #[must_use]
    pub fn for_event(event: SignalEvent) -> Self {
        let mut steps = PatternBuilder::default();
        match event {
            SignalEvent::CopyStart => {
                steps.blink(100, 100);
                steps.repeating()
            },
            SignalEvent::VerifyStart => {
                steps.blink(250, 250);
                steps.repeating()
            },
            SignalEvent::EraseStart => {
                steps.blink(800, 200);
                steps.repeating()
            },
            SignalEvent::Success => {
                for _ in 0..3 {
                    steps.blink(80, 80);
                }
                steps.on(2000);
                steps.finite()
            },
            SignalEvent::Empty => {
                for _ in 0..2 {
                    steps.blink(400, 400);
                }
                steps.finite()
            },
            SignalEvent::Error => {
                // SOS: three dots, three dashes, three dots, then a word gap.
                for _ in 0..3 {
                    steps.morse(1);
                }
                steps.off_units(2); // stretch the element gap to a letter gap
                for _ in 0..3 {
                    steps.morse(3);
                }
                steps.off_units(2);
                for _ in 0..3 {
                    steps.morse(1);
                }
                steps.off_units(6); // word gap before the next SOS
                steps.repeating()
            },
        }
    }

    /// Steps of one iteration.
    #[must_use]
    pub fn steps(&self) -> &[PatternStep] {
        &self.steps
    }

    /// Whether the pattern loops until superseded.
    #[must_use]
    pub fn repeats(&self) -> bool {
        self.repeat
    }
}

/// Accumulates steps in milliseconds, then finalizes into a [`Pattern`].
#[derive(Default)]
struct PatternBuilder {
    steps: Vec<PatternStep>,
}

impl PatternBuilder {
    fn push(&mut self, on: bool, duration: Duration) {
        self.steps.push(PatternStep { on, duration });
    }

    fn blink(&mut self, on_ms: u64, off_ms: u64) {
        self.push(true, Duration::from_millis(on_ms));
        self.push(false, Duration::from_millis(off_ms));
    }

    fn on(&mut self, ms: u64) {
        self.push(true, Duration::from_millis(ms));
    }

    /// A morse element of `units` on, followed by the one-unit element gap.
    fn morse(&mut self, units: u32) {
        self.push(true, MORSE_UNIT * units);
        self.push(false, MORSE_UNIT);
    }

    fn off_units(&mut self, units: u32) {
        self.push(false, MORSE_UNIT * units);
    }

    fn repeating(self) -> Pattern {
        Pattern { steps: self.steps, repeat: true }
    }

    fn finite(self) -> Pattern {
        Pattern { steps: self.steps, repeat: false }
    }
}

/// Walks a [`Pattern`] step by step.
#[derive(Debug, Clone)]
pub struct PatternCursor {
    pattern: Pattern,
    index: usize,
    laps: usize,
}

impl PatternCursor {
    /// Start a cursor at the beginning of `pattern`.
    #[must_use]
    pub fn new(pattern: Pattern) -> Self {
        Self { pattern, index: 0, laps: 0 }
    }

    /// Completed full iterations of a repeating pattern.
    ///
    /// Lets the driving task cut a repeating pattern at an iteration
    /// boundary once no further events can arrive.
    #[must_use]
    pub fn laps(&self) -> usize {
        self.laps
    }

    /// Next step to apply, or `None` once a finite pattern is exhausted.
    pub fn next_step(&mut self) -> Option<PatternStep> {
        if self.index == self.pattern.steps.len() {
            if !self.pattern.repeats() {
                return None;
            }
            self.index = 0;
            self.laps += 1;
        }
        let step = self.pattern.steps.get(self.index).copied();
        self.index += 1;
        step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total_on_time(pattern: &Pattern) -> Duration {
        pattern.steps().iter().filter(|s| s.on).map(|s| s.duration).sum()
    }

    #[test]
    fn copy_pattern_is_fast_symmetric_blink() {
        let pattern = Pattern::for_event(SignalEvent::CopyStart);
        assert!(pattern.repeats());
        assert_eq!(pattern.steps(), &[
            PatternStep { on: true, duration: Duration::from_millis(100) },
            PatternStep { on: false, duration: Duration::from_millis(100) },
        ]);
    }

    #[test]
    fn success_pattern_is_finite_and_ends_with_long_on() {
        let pattern = Pattern::for_event(SignalEvent::Success);
        assert!(!pattern.repeats());
        let last = pattern.steps().last().unwrap();
        assert!(last.on);
        assert_eq!(last.duration, Duration::from_millis(2000));
        // three double-steps plus the hold
        assert_eq!(pattern.steps().len(), 7);
    }

    #[test]
    fn empty_pattern_is_two_slow_blinks() {
        let pattern = Pattern::for_event(SignalEvent::Empty);
        assert!(!pattern.repeats());
        assert_eq!(pattern.steps().len(), 4);
        assert_eq!(total_on_time(&pattern), Duration::from_millis(800));
    }

    #[test]
    fn sos_has_nine_elements_with_dash_middle() {
        let pattern = Pattern::for_event(SignalEvent::Error);
        assert!(pattern.repeats());
        let on_steps: Vec<Duration> =
            pattern.steps().iter().filter(|s| s.on).map(|s| s.duration).collect();
        assert_eq!(on_steps.len(), 9);
        assert_eq!(on_steps[0], MORSE_UNIT);
        assert_eq!(on_steps[3], MORSE_UNIT * 3);
        assert_eq!(on_steps[8], MORSE_UNIT);
    }

    #[test]
    fn only_error_supersedes_mid_step() {
        assert!(SignalEvent::Error.supersedes_immediately());
        assert!(!SignalEvent::Success.supersedes_immediately());
    }

    #[test]
    fn cursor_wraps_repeating_patterns() {
        let mut cursor = PatternCursor::new(Pattern::for_event(SignalEvent::VerifyStart));
        let first = cursor.next_step().unwrap();
        let _second = cursor.next_step().unwrap();
        let wrapped = cursor.next_step().unwrap();
        assert_eq!(first, wrapped);
    }

    #[test]
    fn cursor_exhausts_finite_patterns() {
        let mut cursor = PatternCursor::new(Pattern::for_event(SignalEvent::Empty));
        let mut count = 0;
        while cursor.next_step().is_some() {
            count += 1;
        }
        assert_eq!(count, 4);
        assert!(cursor.next_step().is_none());
    }
}
