//! Action tree interpreter.
//!
//! [`Action`] is the closed instruction set of the engine.  Every variant is
//! evaluated by one arm of [`Action::execute`]; composite variants recurse
//! into nested [`ActionList`]s.  Results are booleans: predicates return what
//! they computed and pure-effect actions return `true`, so a rule can serve
//! as either a condition or an effect sequence.
//!
//! # Composites
//!
//! | Variant | Behaviour |
//! |---|---|
//! | [`And`][Action::And] | Runs children in order; stops at the first `false`. |
//! | [`Or`][Action::Or] | Runs children in order; stops at the first `true`. |
//! | [`Not`][Action::Not] | Inverts exactly one child. |
//! | [`If`][Action::If] | Runs `then` or `else` depending on a condition; `true` if no branch ran. |
//! | [`SetDevice`][Action::SetDevice] / [`SetRail`][Action::SetRail] | Runs a nested list in another device or rail scope. |
//!
//! A failing child propagates immediately; later siblings are never run.
//!
//! # Example
//!
//! ```rust
//! use regulators_engine::action::Action;
//! use regulators_engine::register::{CompareOp, CompareRegister, Operand, RegisterFormat};
//!
//! let vout_high = CompareRegister::new(0x8B, RegisterFormat::U16, CompareOp::Greater, Operand::Literal(0x0200))?;
//! let tree = Action::and(vec![Action::compare_presence("vdd2", true), vout_high.into()])?;
//! assert!(tree.to_string().starts_with("and: [ compare_presence"));
//! # Ok::<(), regulators_types::RegulatorError>(())
//! ```

use std::fmt;

use regulators_types::{ErrorFrame, RegulatorError, Severity};

use crate::environment::ActionEnvironment;
use crate::pmbus::WriteVoutCommand;
use crate::register::{CaptureBytes, CompareRegister, ReadSensor, WriteRegister, check_len};

// ─────────────────────────────────────────────────────────────────────────────
// ActionList
// ─────────────────────────────────────────────────────────────────────────────

/// A non-empty ordered sequence of actions.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionList {
    actions: Vec<Action>,
}

impl ActionList {
    /// # Errors
    ///
    /// [`RegulatorError::ActionType`] when `actions` is empty.
    pub fn new(actions: Vec<Action>) -> Result<Self, RegulatorError> {
        Self::for_owner("action_list", actions)
    }

    /// Like [`ActionList::new`], naming `owner` in the error.
    pub(crate) fn for_owner(owner: &str, actions: Vec<Action>) -> Result<Self, RegulatorError> {
        if actions.is_empty() {
            return Err(RegulatorError::action_type(
                owner,
                "action list must contain at least one action",
            ));
        }
        Ok(Self { actions })
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Run every action in order and return the result of the last one.
    pub fn execute(&self, env: &mut ActionEnvironment<'_>) -> Result<bool, RegulatorError> {
        let mut result = true;
        for action in &self.actions {
            result = action.execute(env)?;
        }
        Ok(result)
    }
}

impl fmt::Display for ActionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[ ")?;
        for (i, action) in self.actions.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{action}")?;
        }
        f.write_str(" ]")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Variant payloads
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct IfAction {
    condition: Box<Action>,
    then: ActionList,
    otherwise: Option<ActionList>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetDeviceAction {
    device_id: String,
    rail_id: Option<String>,
    actions: ActionList,
}

impl SetDeviceAction {
    /// An absent target is skipped with a notice; its actions never run.
    fn execute(&self, env: &mut ActionEnvironment<'_>) -> Result<bool, RegulatorError> {
        if !env.resolve_presence(&self.device_id)? {
            env.add_finding(
                Severity::Notice,
                "device_not_present",
                None,
                format!("skipped actions for absent device \"{}\"", self.device_id),
            );
            return Ok(false);
        }
        let mut scoped = env.enter_device(&self.device_id, self.rail_id.as_deref())?;
        self.actions.execute(&mut scoped)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetRailAction {
    rail_id: String,
    actions: ActionList,
}

impl SetRailAction {
    fn execute(&self, env: &mut ActionEnvironment<'_>) -> Result<bool, RegulatorError> {
        let mut scoped = env.enter_rail(&self.rail_id)?;
        self.actions.execute(&mut scoped)
    }
}

/// Record a finding against the active device and rail without affecting
/// control flow.  Optionally captures register bytes alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFinding {
    severity: Severity,
    code: String,
    message: String,
    capture: Option<(u8, usize)>,
}

impl LogFinding {
    pub fn new(severity: Severity, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: code.into(),
            message: message.into(),
            capture: None,
        }
    }

    /// Attach `count` bytes read from `register` to the finding.
    ///
    /// # Errors
    ///
    /// [`RegulatorError::ActionType`] for a count outside one bus block.
    pub fn with_capture(mut self, register: u8, count: usize) -> Result<Self, RegulatorError> {
        check_len("log_finding", count)?;
        self.capture = Some((register, count));
        Ok(self)
    }

    fn execute(&self, env: &mut ActionEnvironment<'_>) -> Result<bool, RegulatorError> {
        let captured = match self.capture {
            Some((register, count)) => Some(env.with_bus(register, |bus| bus.read(register, count))?),
            None => None,
        };
        env.add_finding(self.severity, &self.code, captured, self.message.as_str());
        Ok(true)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Action
// ─────────────────────────────────────────────────────────────────────────────

/// One interpreter instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    And(ActionList),
    Or(ActionList),
    Not(Box<Action>),
    If(IfAction),
    /// Late-bound rule invocation by ID.
    RunRule(String),
    SetDevice(SetDeviceAction),
    SetRail(SetRailAction),
    CompareRegister(CompareRegister),
    WriteRegister(WriteRegister),
    CaptureBytes(CaptureBytes),
    ReadSensor(ReadSensor),
    /// Compare another device's presence this cycle with an expected value.
    ComparePresence { device_id: String, expected: bool },
    LogFinding(LogFinding),
    WriteVoutCommand(WriteVoutCommand),
}

impl Action {
    pub fn and(actions: Vec<Action>) -> Result<Self, RegulatorError> {
        ActionList::for_owner("and", actions).map(Action::And)
    }

    pub fn or(actions: Vec<Action>) -> Result<Self, RegulatorError> {
        ActionList::for_owner("or", actions).map(Action::Or)
    }

    pub fn not(action: Action) -> Self {
        Action::Not(Box::new(action))
    }

    /// Conditional.  An empty `otherwise` means there is no else branch.
    ///
    /// # Errors
    ///
    /// [`RegulatorError::ActionType`] when `then` is empty.
    pub fn if_then(
        condition: Action,
        then: Vec<Action>,
        otherwise: Vec<Action>,
    ) -> Result<Self, RegulatorError> {
        let then = ActionList::for_owner("if", then)?;
        let otherwise = if otherwise.is_empty() {
            None
        } else {
            Some(ActionList::for_owner("if", otherwise)?)
        };
        Ok(Action::If(IfAction {
            condition: Box::new(condition),
            then,
            otherwise,
        }))
    }

    pub fn run_rule(rule_id: impl Into<String>) -> Self {
        Action::RunRule(rule_id.into())
    }

    pub fn set_device(
        device_id: impl Into<String>,
        rail_id: Option<&str>,
        actions: Vec<Action>,
    ) -> Result<Self, RegulatorError> {
        Ok(Action::SetDevice(SetDeviceAction {
            device_id: device_id.into(),
            rail_id: rail_id.map(str::to_string),
            actions: ActionList::for_owner("set_device", actions)?,
        }))
    }

    pub fn set_rail(rail_id: impl Into<String>, actions: Vec<Action>) -> Result<Self, RegulatorError> {
        Ok(Action::SetRail(SetRailAction {
            rail_id: rail_id.into(),
            actions: ActionList::for_owner("set_rail", actions)?,
        }))
    }

    pub fn compare_presence(device_id: impl Into<String>, expected: bool) -> Self {
        Action::ComparePresence {
            device_id: device_id.into(),
            expected,
        }
    }

    /// Evaluate this action against `env`.
    ///
    /// Errors from leaf and scope actions are wrapped in an
    /// [`ErrorFrame::Action`] naming the action; combinators and `run_rule`
    /// pass errors through unchanged (the rule adds its own frame).
    pub fn execute(&self, env: &mut ActionEnvironment<'_>) -> Result<bool, RegulatorError> {
        match self {
            Action::And(list) => {
                for action in list.actions() {
                    if !action.execute(env)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Action::Or(list) => {
                for action in list.actions() {
                    if action.execute(env)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Action::Not(inner) => inner.execute(env).map(|result| !result),
            Action::If(branch) => {
                if branch.condition.execute(env)? {
                    branch.then.execute(env)
                } else {
                    match &branch.otherwise {
                        Some(otherwise) => otherwise.execute(env),
                        None => Ok(true),
                    }
                }
            }
            Action::RunRule(rule_id) => env.rule(rule_id)?.execute(env),
            Action::SetDevice(set) => self.framed(set.execute(env)),
            Action::SetRail(set) => self.framed(set.execute(env)),
            Action::CompareRegister(compare) => self.framed(compare.execute(env)),
            Action::WriteRegister(write) => self.framed(write.execute(env)),
            Action::CaptureBytes(capture) => self.framed(capture.execute(env)),
            Action::ReadSensor(read) => self.framed(read.execute(env)),
            Action::ComparePresence {
                device_id,
                expected,
            } => self.framed(env.resolve_presence(device_id).map(|present| present == *expected)),
            Action::LogFinding(log) => self.framed(log.execute(env)),
            Action::WriteVoutCommand(write) => self.framed(write.execute(env)),
        }
    }

    fn framed(&self, result: Result<bool, RegulatorError>) -> Result<bool, RegulatorError> {
        result.map_err(|err| err.within(ErrorFrame::Action(self.to_string())))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::And(list) => write!(f, "and: {list}"),
            Action::Or(list) => write!(f, "or: {list}"),
            Action::Not(inner) => write!(f, "not: {{ {inner} }}"),
            Action::If(branch) => {
                write!(f, "if: {{ condition: {}, then: {}", branch.condition, branch.then)?;
                if let Some(otherwise) = &branch.otherwise {
                    write!(f, ", else: {otherwise}")?;
                }
                f.write_str(" }")
            }
            Action::RunRule(rule_id) => write!(f, "run_rule: {rule_id}"),
            Action::SetDevice(set) => match &set.rail_id {
                Some(rail_id) => write!(f, "set_device: {}/{rail_id}", set.device_id),
                None => write!(f, "set_device: {}", set.device_id),
            },
            Action::SetRail(set) => write!(f, "set_rail: {}", set.rail_id),
            Action::CompareRegister(compare) => write!(f, "{compare}"),
            Action::WriteRegister(write) => write!(f, "{write}"),
            Action::CaptureBytes(capture) => write!(f, "{capture}"),
            Action::ReadSensor(read) => write!(f, "{read}"),
            Action::ComparePresence {
                device_id,
                expected,
            } => write!(f, "compare_presence: {{ device: {device_id}, expected: {expected} }}"),
            Action::LogFinding(log) => write!(
                f,
                "log_finding: {{ severity: {}, code: {} }}",
                log.severity, log.code
            ),
            Action::WriteVoutCommand(write) => write!(f, "{write}"),
        }
    }
}

impl From<CompareRegister> for Action {
    fn from(action: CompareRegister) -> Self {
        Action::CompareRegister(action)
    }
}

impl From<WriteRegister> for Action {
    fn from(action: WriteRegister) -> Self {
        Action::WriteRegister(action)
    }
}

impl From<CaptureBytes> for Action {
    fn from(action: CaptureBytes) -> Self {
        Action::CaptureBytes(action)
    }
}

impl From<ReadSensor> for Action {
    fn from(action: ReadSensor) -> Self {
        Action::ReadSensor(action)
    }
}

impl From<LogFinding> for Action {
    fn from(action: LogFinding) -> Self {
        Action::LogFinding(action)
    }
}

impl From<WriteVoutCommand> for Action {
    fn from(action: WriteVoutCommand) -> Self {
        Action::WriteVoutCommand(action)
    }
}
