//! Change ticks. The world carries a monotonically increasing counter that
//! advances once per schedule pass; every component value records the tick at
//! which it was added and the tick at which it was last written. Comparisons
//! are wrapping, so ticks are periodically clamped to keep every stored tick
//! within half the `u32` range of the current counter.

/// Maximum age a stored tick may reach before [`Tick::check`] clamps it.
/// Chosen so that wrapping comparisons stay unambiguous.
pub const MAX_CHANGE_AGE: u32 = u32::MAX - (2 * (1 << 30) - 1);

/// A point on the world's change counter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tick(u32);

impl Tick {
    /// The tick assigned to values created before the first schedule pass.
    pub const ZERO: Self = Self(0);

    /// Construct a tick from a raw counter value.
    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the raw counter value.
    #[inline]
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Advance this tick by one, wrapping on overflow.
    #[inline]
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// Age of this tick relative to `now`, saturating at [`MAX_CHANGE_AGE`].
    #[inline]
    pub fn age(&self, now: Tick) -> u32 {
        now.0.wrapping_sub(self.0).min(MAX_CHANGE_AGE)
    }

    /// Whether an event stamped with this tick happened after `last_run`, as
    /// observed at `this_run`. Both distances are measured with wrapping
    /// arithmetic so the comparison survives counter overflow.
    #[inline]
    pub fn is_newer_than(&self, last_run: Tick, this_run: Tick) -> bool {
        let ticks_since_event = self.age(this_run);
        let ticks_since_run = last_run.age(this_run);
        ticks_since_event < ticks_since_run
    }

    /// Clamp this tick so its age relative to `now` never exceeds
    /// [`MAX_CHANGE_AGE`]. Returns true if the tick was adjusted.
    #[inline]
    pub fn check(&mut self, now: Tick) -> bool {
        if self.age(now) == MAX_CHANGE_AGE {
            *self = Tick(now.0.wrapping_sub(MAX_CHANGE_AGE));
            true
        } else {
            false
        }
    }
}

/// The pair of ticks stored alongside every component value.
#[derive(Debug, Clone, Copy)]
pub struct ComponentTicks {
    /// Tick at which the value was inserted.
    pub added: Tick,
    /// Tick at which the value was last written.
    pub changed: Tick,
}

impl ComponentTicks {
    /// Ticks for a freshly inserted value.
    #[inline]
    pub fn new(tick: Tick) -> Self {
        Self {
            added: tick,
            changed: tick,
        }
    }

    /// Whether the value was added after `last_run`.
    #[inline]
    pub fn is_added(&self, last_run: Tick, this_run: Tick) -> bool {
        self.added.is_newer_than(last_run, this_run)
    }

    /// Whether the value was written after `last_run`.
    #[inline]
    pub fn is_changed(&self, last_run: Tick, this_run: Tick) -> bool {
        self.changed.is_newer_than(last_run, this_run)
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_than_without_wrap() {
        // Given an event at tick 5 and a system that last ran at tick 3.
        let event = Tick::new(5);
        // When observed at tick 10.
        // Then the event is seen as new.
        assert!(event.is_newer_than(Tick::new(3), Tick::new(10)));
        // And a system that last ran at tick 7 does not see it.
        assert!(!event.is_newer_than(Tick::new(7), Tick::new(10)));
    }

    #[test]
    fn newer_than_across_wrap() {
        // Given ticks straddling the u32 boundary.
        let event = Tick::new(2);
        let last_run = Tick::new(u32::MAX - 3);
        let this_run = Tick::new(5);
        // Then wrapping comparison still orders them correctly.
        assert!(event.is_newer_than(last_run, this_run));
    }

    #[test]
    fn check_clamps_old_ticks() {
        // Given a tick that has aged past the maximum.
        let now = Tick::new(MAX_CHANGE_AGE.wrapping_add(100));
        let mut old = Tick::new(0);
        // When checked.
        let adjusted = old.check(now);
        // Then it is clamped to the maximum age.
        assert!(adjusted);
        assert_eq!(old.age(now), MAX_CHANGE_AGE);
        // And a recent tick is left alone.
        let mut recent = Tick::new(now.get() - 1);
        assert!(!recent.check(now));
    }
}
