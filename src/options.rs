use std::{rc::Rc, time::Duration};

use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};

use crate::notify::{IdleScheduler, Scheduler, TimerScheduler};

#[cfg(test)]
mod tests;

/// How settle passes are deferred.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Display, FromStr, Serialize, Deserialize,
)]
#[display(style = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Scheduling {
    /// After every other task of the runtime.
    #[default]
    Idle,
    /// After a fixed delay.
    Timer,
}

/// Options of one form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormOptions {
    /// Read-only mode, passed to expression evaluators.
    pub readonly: bool,
    pub scheduling: Scheduling,
    /// Delay of [`Scheduling::Timer`].
    pub settle_delay_ms: u64,
    pub invalid_message: String,
    pub required_message: String,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            readonly: false,
            scheduling: Scheduling::Idle,
            settle_delay_ms: 100,
            invalid_message: "Invalid field".into(),
            required_message: "Field is required".into(),
        }
    }
}

impl FormOptions {
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
    pub(crate) fn scheduler(&self) -> Rc<dyn Scheduler> {
        match self.scheduling {
            Scheduling::Idle => Rc::new(IdleScheduler),
            Scheduling::Timer => Rc::new(TimerScheduler::new(self.settle_delay())),
        }
    }
}
