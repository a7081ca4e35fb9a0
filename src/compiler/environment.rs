use std::collections::HashSet;

use crate::parser::ast::DeclKind;

/// The set of names the code generator currently accepts.
///
/// Scalar names and stack names live in disjoint sets, and a name may be
/// declared only once across both. Blocks do not open a new scope; only a
/// function definition does, by working on a copy (see [`Self::enter_function`])
/// that is dropped when the definition has been generated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    variables: HashSet<Box<str>>,
    stacks: HashSet<Box<str>>,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("name is already bound as a {0:?}")]
pub struct AlreadyDefined(pub DeclKind);

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: impl AsRef<str>) -> Option<DeclKind> {
        let name = name.as_ref();
        if self.variables.contains(name) {
            Some(DeclKind::Scalar)
        } else if self.stacks.contains(name) {
            Some(DeclKind::Stack)
        } else {
            None
        }
    }

    pub fn is_variable(&self, name: impl AsRef<str>) -> bool {
        self.variables.contains(name.as_ref())
    }

    pub fn is_stack(&self, name: impl AsRef<str>) -> bool {
        self.stacks.contains(name.as_ref())
    }

    /// Adds a new binding.
    ///
    /// Fails if the name is already bound, whatever its kind.
    pub fn define(&mut self, name: impl AsRef<str>, kind: DeclKind) -> Result<(), AlreadyDefined> {
        let name = name.as_ref();
        if let Some(existing) = self.get(name) {
            return Err(AlreadyDefined(existing));
        }
        let set = match kind {
            DeclKind::Scalar => &mut self.variables,
            DeclKind::Stack => &mut self.stacks,
        };
        set.insert(Box::from(name));
        Ok(())
    }

    /// The scope a function body starts with: every name visible here,
    /// in a copy that the caller's scope never sees changes to.
    pub fn enter_function(&self) -> Self {
        self.clone()
    }
}
