use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// CRD status object.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SpireServerStatus {
    /// The conditions of the reconciled server, keyed by `type`.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// The status value of a condition.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(val: bool) -> Self {
        if val {
            Self::True
        } else {
            Self::False
        }
    }
}

/// A status condition, shaped after the canonical `metav1.Condition`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// The type of this condition, e.g. `Ready`.
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    /// A CamelCase reason for the last transition.
    pub reason: String,
    /// A human readable message for the last transition.
    #[serde(default)]
    pub message: String,
    /// RFC 3339 timestamp of the last time `status` changed.
    pub last_transition_time: String,
    /// The spec generation this condition was computed from.
    #[serde(default)]
    pub observed_generation: i64,
}

impl SpireServerStatus {
    /// Get the condition of the given type.
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|cond| cond.type_ == type_)
    }

    /// Check if the condition of the given type is present and `True`.
    pub fn is_true(&self, type_: &str) -> bool {
        matches!(self.condition(type_), Some(cond) if cond.status == ConditionStatus::True)
    }

    /// Insert or update the condition of the given type.
    ///
    /// The `last_transition_time` of an existing condition is only replaced with `now` when its
    /// status changes. Returns `true` if anything about the condition changed.
    pub fn set_condition(
        &mut self, type_: &str, status: impl Into<ConditionStatus>, reason: &str, message: impl Into<String>, generation: i64, now: &str,
    ) -> bool {
        let (status, message) = (status.into(), message.into());
        match self.conditions.iter_mut().find(|cond| cond.type_ == type_) {
            Some(cond) => {
                if cond.status == status && cond.reason == reason && cond.message == message && cond.observed_generation == generation {
                    return false;
                }
                if cond.status != status {
                    cond.last_transition_time = now.into();
                }
                cond.status = status;
                cond.reason = reason.into();
                cond.message = message;
                cond.observed_generation = generation;
                true
            }
            None => {
                self.conditions.push(Condition {
                    type_: type_.into(),
                    status,
                    reason: reason.into(),
                    message,
                    last_transition_time: now.into(),
                    observed_generation: generation,
                });
                true
            }
        }
    }

    /// Remove the condition of the given type, returning `true` if it was present.
    pub fn remove_condition(&mut self, type_: &str) -> bool {
        let len = self.conditions.len();
        self.conditions.retain(|cond| cond.type_ != type_);
        len != self.conditions.len()
    }
}
