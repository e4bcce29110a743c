//! Periodic component health checks behind the probe endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::task::JoinHandle;

use crate::sessions::SessionRegistry;

#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub name: String,
    pub healthy: bool,
    pub last_check: Instant,
    pub last_error: Option<String>,
    pub check_count: u64,
    pub failure_count: u64,
}

pub trait HealthCheck: Send + Sync {
    fn check(&self) -> Result<(), String>;
    fn name(&self) -> &str;
}

pub struct HealthMonitor {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    checks: Arc<RwLock<Vec<Box<dyn HealthCheck>>>>,
    check_interval: Duration,
}

impl HealthMonitor {
    pub fn new(check_interval: Duration) -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            checks: Arc::new(RwLock::new(Vec::new())),
            check_interval,
        }
    }

    pub fn register(&self, check: Box<dyn HealthCheck>) {
        let name = check.name().to_string();
        self.components.write().insert(
            name.clone(),
            ComponentHealth {
                name,
                healthy: true,
                last_check: Instant::now(),
                last_error: None,
                check_count: 0,
                failure_count: 0,
            },
        );
        self.checks.write().push(check);
    }

    /// Runs every registered check once, updating component status.
    pub fn run_checks(&self) {
        let now = Instant::now();
        let mut components = self.components.write();
        for check in self.checks.read().iter() {
            let name = check.name().to_string();
            let entry = components.entry(name.clone()).or_insert(ComponentHealth {
                name: name.clone(),
                healthy: true,
                last_check: now,
                last_error: None,
                check_count: 0,
                failure_count: 0,
            });
            entry.check_count += 1;
            entry.last_check = now;
            match check.check() {
                Ok(()) => {
                    if !entry.healthy {
                        tracing::info!(component = %name, "component recovered");
                    }
                    entry.healthy = true;
                    entry.last_error = None;
                }
                Err(err) => {
                    entry.healthy = false;
                    entry.failure_count += 1;
                    tracing::warn!(
                        component = %name,
                        failure_count = entry.failure_count,
                        "health check failed: {}",
                        err
                    );
                    entry.last_error = Some(err);
                }
            }
        }
    }

    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.check_interval);
            loop {
                ticker.tick().await;
                self.run_checks();
            }
        })
    }

    pub fn status(&self) -> HashMap<String, ComponentHealth> {
        self.components.read().clone()
    }

    pub fn all_healthy(&self) -> bool {
        self.components.read().values().all(|c| c.healthy)
    }
}

/// Surfaces sessions that keep SPEAKING without the gateway ever arming the
/// guard: barge-in is silently disabled for them, which an operator must
/// see.
pub struct GuardArmCheck {
    registry: Arc<SessionRegistry>,
    grace: Duration,
}

impl GuardArmCheck {
    pub fn new(registry: Arc<SessionRegistry>, grace: Duration) -> Self {
        Self { registry, grace }
    }
}

impl HealthCheck for GuardArmCheck {
    fn check(&self) -> Result<(), String> {
        let stuck = self.registry.guard_unarmed_speaking(self.grace);
        if stuck.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "barge-in guard never armed for speaking sessions: {}",
                stuck.join(", ")
            ))
        }
    }

    fn name(&self) -> &str {
        "barge_in_guard"
    }
}
