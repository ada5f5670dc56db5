use crate::storage::Persist;
use chrono::{DateTime, Utc};

/// Per-message write context.
///
/// Every row written while handling one message carries the same `time`, and
/// all of them go through the same storage session.
pub struct ConsumerCtx<'a> {
    time: DateTime<Utc>,
    persist: &'a mut dyn Persist,
    perform_updates: bool,
}

impl<'a> ConsumerCtx<'a> {
    pub fn new(time: DateTime<Utc>, persist: &'a mut dyn Persist, perform_updates: bool) -> Self {
        Self {
            time,
            persist,
            perform_updates,
        }
    }

    #[must_use]
    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    /// Whether existing rows are overwritten instead of left untouched.
    #[must_use]
    pub fn perform_updates(&self) -> bool {
        self.perform_updates
    }

    pub fn persist(&mut self) -> &mut (dyn Persist + 'a) {
        &mut *self.persist
    }
}
