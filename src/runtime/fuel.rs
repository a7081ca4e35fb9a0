//! Fuel for the machine

/// What one executed instruction costs
pub const INSTRUCTION_COST: i64 = 1;

/// An execution budget handed to [`StackMachine::run_with_fuel`].
///
/// [`StackMachine::run_with_fuel`]: super::StackMachine::run_with_fuel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fuel {
    fuel: i64,
    interrupted: bool,
}

impl Fuel {
    pub fn empty() -> Self {
        Self::with(0)
    }

    pub fn with(fuel: i64) -> Self {
        Self {
            fuel,
            interrupted: false,
        }
    }

    /// Credits fuel, capped at `max_fuel`, and clears the interrupt flag.
    ///
    /// Meant to be called between two runs that reuse the same budget.
    pub fn refill(&mut self, fuel: i64, max_fuel: i64) {
        self.fuel = self.fuel.saturating_add(fuel).min(max_fuel);
        self.interrupted = false;
    }

    /// Add to or subtract from the current remaining fuel.
    pub fn adjust(&mut self, fuel: i64) {
        self.fuel = self.fuel.saturating_add(fuel);
    }

    pub fn consume(&mut self, fuel: i64) {
        self.adjust(fuel.saturating_neg());
    }

    pub fn remaining(&self) -> i64 {
        self.fuel
    }

    /// Makes the running machine stop after its current instruction, without
    /// consuming any fuel.
    pub fn interrupt(&mut self) {
        self.interrupted = true;
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn clear_interrupt(&mut self) {
        self.interrupted = false;
    }

    /// Returns true if we have positive fuel remaining *and* we have not been interrupted.
    pub fn should_continue(&self) -> bool {
        self.fuel > 0 && !self.interrupted
    }
}
