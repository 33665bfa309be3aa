//! Wake-on-move fallback and service-death registration.
//!
//! Significant-change monitoring is only switched on while a GPS gap is open.
//! Service-death watching lives exactly as long as the running state, held by
//! a guard that unregisters on drop.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::ports::WakePlatform;

pub struct WakeOnMoveMonitor {
    platform: Arc<dyn WakePlatform>,
    fallback_active: bool,
}

impl WakeOnMoveMonitor {
    pub fn new(platform: Arc<dyn WakePlatform>) -> Self {
        Self {
            platform,
            fallback_active: false,
        }
    }

    pub fn is_fallback_active(&self) -> bool {
        self.fallback_active
    }

    pub fn activate_fallback(&mut self) {
        if self.fallback_active {
            return;
        }
        match self.platform.start_significant_changes() {
            Ok(()) => {
                self.fallback_active = true;
                debug!("Wake-on-move fallback activated");
            }
            Err(err) => warn!(error = %err, "Failed to activate wake-on-move fallback"),
        }
    }

    pub fn deactivate_fallback(&mut self) {
        if !self.fallback_active {
            return;
        }
        if let Err(err) = self.platform.stop_significant_changes() {
            warn!(error = %err, "Failed to deactivate wake-on-move fallback");
        }
        self.fallback_active = false;
        debug!("Wake-on-move fallback deactivated");
    }

    /// Register for service-death callbacks for the duration of the guard.
    pub fn watch_service_death(&self) -> ServiceDeathWatch {
        let registered = match self.platform.watch_service_death() {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "Failed to register service-death callback");
                false
            }
        };
        ServiceDeathWatch {
            platform: Arc::clone(&self.platform),
            registered,
        }
    }
}

pub struct ServiceDeathWatch {
    platform: Arc<dyn WakePlatform>,
    registered: bool,
}

impl ServiceDeathWatch {
    pub fn is_registered(&self) -> bool {
        self.registered
    }
}

impl Drop for ServiceDeathWatch {
    fn drop(&mut self) {
        if self.registered {
            self.platform.unwatch_service_death();
        }
    }
}
