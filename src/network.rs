//! Network connectivity as seen by the sync and cache layers.

use serde::Deserialize;
use std::sync::atomic::{AtomicU8, Ordering};

/// Network class, ordered from worst to best.
///
/// A cache run records the class it started with and stops scheduling work
/// once the current class drops below it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkClass {
    Offline = 0,
    Mobile = 1,
    Metered = 2,
    #[default]
    Unmetered = 3,
}

impl NetworkClass {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => NetworkClass::Offline,
            1 => NetworkClass::Mobile,
            2 => NetworkClass::Metered,
            _ => NetworkClass::Unmetered,
        }
    }
}

/// Source of the current network class.
pub trait NetworkMonitor: Send + Sync {
    fn current(&self) -> NetworkClass;

    fn is_online(&self) -> bool {
        self.current() > NetworkClass::Offline
    }
}

/// Monitor whose class is set explicitly (CLI configuration, tests).
#[derive(Debug)]
pub struct ManualNetwork {
    class: AtomicU8,
}

impl ManualNetwork {
    pub fn new(class: NetworkClass) -> Self {
        Self {
            class: AtomicU8::new(class as u8),
        }
    }

    pub fn set(&self, class: NetworkClass) {
        self.class.store(class as u8, Ordering::SeqCst);
    }
}

impl NetworkMonitor for ManualNetwork {
    fn current(&self) -> NetworkClass {
        NetworkClass::from_u8(self.class.load(Ordering::SeqCst))
    }
}
