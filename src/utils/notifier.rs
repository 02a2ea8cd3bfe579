//! Process-wide error notifier.
//!
//! Every error met during a repair, backup or restore passes through
//! [`notify`]: it is logged at the level matching its severity and handed to
//! each registered callback.

use std::{
    collections::BTreeMap,
    path::Path,
    sync::{Arc, OnceLock},
};

use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::types::error::{DatabaseError, Severity};

/// Callback invoked with each notified error and the file it concerns.
pub type Notification = Arc<dyn Fn(&DatabaseError, &Path) + Send + Sync>;

fn notifications() -> &'static RwLock<BTreeMap<String, Notification>> {
    static NOTIFICATIONS: OnceLock<RwLock<BTreeMap<String, Notification>>> = OnceLock::new();
    NOTIFICATIONS.get_or_init(|| RwLock::new(BTreeMap::new()))
}

/// Registers `callback` under `key`, replacing any earlier one.
pub fn set_notification<F>(key: impl Into<String>, callback: F)
where
    F: Fn(&DatabaseError, &Path) + Send + Sync + 'static,
{
    notifications().write().insert(key.into(), Arc::new(callback));
}

pub fn remove_notification(key: &str) {
    notifications().write().remove(key);
}

pub fn notify(database_error: &DatabaseError, path: &Path) {
    match database_error.severity() {
        Severity::Critical => {
            error!(path = %path.display(), kind = ?database_error.kind(), "{}", database_error)
        }
        Severity::Warning => {
            warn!(path = %path.display(), kind = ?database_error.kind(), "{}", database_error)
        }
        Severity::Notice => {
            info!(path = %path.display(), kind = ?database_error.kind(), "{}", database_error)
        }
    }

    // callbacks run outside the lock so they may register or remove others
    let callbacks: Vec<Notification> = notifications().read().values().cloned().collect();
    for callback in callbacks {
        callback(database_error, path);
    }
}
