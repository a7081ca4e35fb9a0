use std::collections::HashMap;

use lasso::Spur;

use super::value::Value;

/// The activation record of one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    variables: HashMap<Spur, Value>,
    stacks: HashMap<Spur, Vec<Value>>,
    return_address: usize,
}

impl Frame {
    /// The frame execution starts in
    pub fn entry() -> Self {
        Self::default()
    }

    /// A frame for a new call, seeded with a copy of everything bound in `seed`.
    ///
    /// Writes made through the new frame never reach `seed`.
    pub fn call(seed: &Frame, return_address: usize) -> Self {
        Self {
            variables: seed.variables.clone(),
            stacks: seed.stacks.clone(),
            return_address,
        }
    }

    pub fn return_address(&self) -> usize {
        self.return_address
    }

    pub fn load(&self, name: Spur) -> Option<&Value> {
        self.variables.get(&name)
    }

    pub fn store(&mut self, name: Spur, value: Value) {
        self.variables.insert(name, value);
    }

    /// Pushes onto a named stack, creating it on first use
    pub fn stack_push(&mut self, name: Spur, value: Value) {
        self.stacks.entry(name).or_default().push(value);
    }

    pub fn stack(&self, name: Spur) -> Option<&[Value]> {
        self.stacks.get(&name).map(Vec::as_slice)
    }

    pub fn stack_mut(&mut self, name: Spur) -> Option<&mut Vec<Value>> {
        self.stacks.get_mut(&name)
    }
}
