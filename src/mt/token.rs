// src/mt/token.rs

//! Manual completion tickets.
//!
//! A token counts as one expected-and-started child of the group that issued
//! it. Releasing it counts as that child completing. Work that is not a task
//! (main-thread callbacks, external IO) holds a token to keep its group open.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::trace;

use crate::mt::group::Group;
use crate::mt::manager::TaskManager;

pub struct AsyncToken {
    name: String,
    released: AtomicBool,
    group: Weak<dyn Group>,
}

impl AsyncToken {
    pub(crate) fn new(name: &str, group: Weak<dyn Group>) -> Self {
        Self {
            name: name.to_string(),
            released: AtomicBool::new(false),
            group,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Whether the issuing group still exists and has not been cancelled.
    pub fn is_group_available(&self) -> bool {
        self.group
            .upgrade()
            .is_some_and(|group| !group.is_cancelled())
    }

    /// Notify the issuing group once. Later calls are no-ops.
    pub fn release(&self) {
        if self
            .released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        trace!(token = %self.name, "token released");
        if let Some(group) = self.group.upgrade() {
            group.notify_completed();
        }
    }
}

impl Drop for AsyncToken {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for AsyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncToken")
            .field("name", &self.name)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Holds a manager token for its lifetime.
///
/// Keeps the manager from ending while several groups are being set up one
/// after the other.
#[derive(Debug)]
pub struct SchedulingScope {
    token: Option<Arc<AsyncToken>>,
}

impl SchedulingScope {
    pub fn new(manager: &TaskManager) -> Self {
        Self {
            token: manager.try_create_token("SchedulingScope"),
        }
    }

    /// `false` if the manager refused to issue a token.
    pub fn is_valid(&self) -> bool {
        self.token.is_some()
    }
}

impl Drop for SchedulingScope {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.release();
        }
    }
}
