use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::error::BoxError;
use crate::stage::{Sink, StageConfig, StageFuture};
use crate::unit::{DataUnit, Mode};

/// Shared view of the units a [`CollectSink`] received
#[derive(Clone, Default)]
pub struct Collected {
    units: Arc<Mutex<Vec<DataUnit>>>,
}

impl Collected {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the units received so far, in arrival order
    #[must_use]
    pub fn units(&self) -> Vec<DataUnit> {
        self.units.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.units.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.lock().is_empty()
    }

    fn push(&self, unit: DataUnit) {
        self.units.lock().push(unit);
    }
}

impl std::fmt::Debug for Collected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Collected(len={})", self.len())
    }
}

/// Appends every unit to a [`Collected`] handle
///
/// An optional delay simulates a slow side effect before the Ack.
pub struct CollectSink {
    config: StageConfig,
    collected: Collected,
    delay: Option<Duration>,
}

impl CollectSink {
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        Self::with_collected(mode, Collected::new())
    }

    #[must_use]
    pub fn with_collected(mode: Mode, collected: Collected) -> Self {
        Self {
            config: StageConfig::new("collect", mode),
            collected,
            delay: None,
        }
    }

    /// Handle to the collected units, usable after the sink is moved
    #[must_use]
    pub fn collected(&self) -> Collected {
        self.collected.clone()
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.config.high_water_mark = high_water_mark;
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }
}

impl Sink for CollectSink {
    fn config(&self) -> &StageConfig {
        &self.config
    }

    fn consume(&mut self, unit: DataUnit) -> StageFuture<'_, Result<(), BoxError>> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.collected.push(unit);
            Ok(())
        })
    }
}
