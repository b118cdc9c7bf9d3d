//! The hygiene counter.
//!
//! Every generated internal name consumes one tick. A compilation unit
//! records how many ticks its expansions consumed; when the unit is later
//! entered from a precompiled artifact, its expansions do not run again, so
//! the counter is advanced by the recorded delta instead. Names minted after
//! that point therefore never collide with names baked into the artifact.

use serde::{Deserialize, Serialize};

/// Monotonic counter owned by one compilation session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(u64);

/// The counter value at some earlier point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaltCheckpoint(u64);

impl Salt {
    pub fn new(start: u64) -> Self {
        Salt(start)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Returns the current tick and moves past it.
    pub fn next(&mut self) -> u64 {
        let n = self.0;
        self.0 += 1;
        n
    }

    /// `base`, the separator, then a tick.
    pub fn fresh_name(&mut self, base: &str, separator: &str) -> String {
        format!("{}{}{}", base, separator, self.next())
    }

    pub fn checkpoint(&self) -> SaltCheckpoint {
        SaltCheckpoint(self.0)
    }

    /// Ticks consumed since `checkpoint`.
    pub fn delta_since(&self, checkpoint: SaltCheckpoint) -> u64 {
        self.0.saturating_sub(checkpoint.0)
    }

    pub fn advance(&mut self, by: u64) {
        self.0 += by;
    }
}

/// When a unit's top-level code runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Compile-time loading, where definitions and macros take effect.
    Load,
    /// Ordinary execution.
    Run,
}

/// What a finished unit remembers about its use of the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledUnit {
    pub salt_delta: u64,
    pub phase: Phase,
}

impl CompiledUnit {
    /// Closes a unit that started at `start`.
    pub fn record(salt: &Salt, start: SaltCheckpoint, phase: Phase) -> Self {
        Self {
            salt_delta: salt.delta_since(start),
            phase,
        }
    }

    /// Enters the unit. A unit compiled in this session already consumed its
    /// ticks; one loaded from an artifact replays them, once per entry,
    /// whichever phase it is entered in.
    pub fn enter(&self, salt: &mut Salt, precompiled: bool) {
        if precompiled && self.salt_delta > 0 {
            log::debug!(
                "entering precompiled {:?} unit: salt +{}",
                self.phase,
                self.salt_delta
            );
            salt.advance(self.salt_delta);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_names_are_distinct() {
        let mut salt = Salt::default();
        let a = salt.fresh_name("tmp", ":");
        let b = salt.fresh_name("tmp", ":");
        assert_eq!(a, "tmp:0");
        assert_eq!(b, "tmp:1");
    }

    #[test]
    fn precompiled_units_replay_their_delta() {
        let mut compiling = Salt::default();
        let start = compiling.checkpoint();
        compiling.fresh_name("x", ":");
        compiling.fresh_name("y", ":");
        let unit = CompiledUnit::record(&compiling, start, Phase::Load);
        assert_eq!(unit.salt_delta, 2);

        let mut later = Salt::default();
        unit.enter(&mut later, true);
        assert_eq!(later.fresh_name("x", ":"), "x:2");

        let mut same_session = compiling;
        unit.enter(&mut same_session, false);
        assert_eq!(same_session.value(), 2);
    }
}
