//! Periodic monitoring tasks.
//!
//! Two monitors run while the subsystem is initialized: a temperature sweep
//! and a chassis sweep. Each is a tokio task driven by an interval and
//! stopped through a watch channel, so a fresh INI can restart them without
//! leaking the previous generation.

use crate::config::Config;
use crate::controller::AspController;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy)]
enum MonitorKind {
    Temperature,
    Chassis,
}

struct MonitorHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    fn spawn(kind: MonitorKind, period: Duration, controller: AspController) -> Self {
        let (stop, mut rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => match kind {
                        MonitorKind::Temperature => controller.poll_temperatures().await,
                        MonitorKind::Chassis => controller.poll_chassis().await,
                    },
                    _ = rx.changed() => break,
                }
            }
        });
        Self { stop, task }
    }

    async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

pub(crate) struct MonitorSet {
    temperature: MonitorHandle,
    chassis: MonitorHandle,
}

impl MonitorSet {
    pub(crate) fn spawn(controller: AspController, config: &Config) -> Self {
        Self {
            temperature: MonitorHandle::spawn(
                MonitorKind::Temperature,
                config.temperature_period(),
                controller.clone(),
            ),
            chassis: MonitorHandle::spawn(
                MonitorKind::Chassis,
                config.chassis_period(),
                controller,
            ),
        }
    }

    pub(crate) async fn stop(self) {
        self.temperature.stop().await;
        self.chassis.stop().await;
    }
}
