//! Named, reusable action sequences.

use regulators_types::{ErrorFrame, RegulatorError};

use crate::action::{Action, ActionList};
use crate::environment::ActionEnvironment;

/// A rule: an ID plus a non-empty action list, invoked by `run_rule`.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    id: String,
    actions: ActionList,
}

impl Rule {
    /// # Errors
    ///
    /// [`RegulatorError::ActionType`] when `actions` is empty.
    pub fn new(id: impl Into<String>, actions: Vec<Action>) -> Result<Self, RegulatorError> {
        Ok(Self {
            id: id.into(),
            actions: ActionList::for_owner("rule", actions)?,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn actions(&self) -> &[Action] {
        self.actions.actions()
    }

    /// Execute in the caller's environment and return the last action's
    /// result.  Failures are wrapped in a rule frame.
    ///
    /// # Errors
    ///
    /// [`RegulatorError::RuleRecursion`] when this rule is already active in
    /// the call chain or the chain is too deep; otherwise whatever an action
    /// raised.
    pub fn execute(&self, env: &mut ActionEnvironment<'_>) -> Result<bool, RegulatorError> {
        let mut scoped = env.enter_rule(&self.id)?;
        self.actions
            .execute(&mut scoped)
            .map_err(|err| err.within(ErrorFrame::Rule(self.id.clone())))
    }
}
