use tracing::{info, warn};

use crate::error::BoxError;
use crate::stage::{Sink, StageConfig, StageFuture};
use crate::unit::{DataUnit, Mode};

/// Local sink: logs every unit
///
/// With `parse` enabled, byte chunks are decoded first. A chunk that does
/// not decode is logged raw together with the decode error.
pub struct LogSink {
    config: StageConfig,
    parse: bool,
    consumed: u64,
}

impl LogSink {
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        Self {
            config: StageConfig::new("log", mode),
            parse: false,
            consumed: 0,
        }
    }

    #[must_use]
    pub fn with_parse(mut self, parse: bool) -> Self {
        self.parse = parse;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: StageConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.config.high_water_mark = high_water_mark;
        self
    }

    /// Units logged so far
    #[must_use]
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    fn log_unit(&self, unit: &DataUnit) {
        let stage = &self.config.name;
        match unit {
            DataUnit::Bytes(_) if self.parse => match unit.decode() {
                Ok(record) => info!(stage = %stage, record = %record, "WRITE"),
                Err(e) => warn!(stage = %stage, raw = %unit.to_text(), error = %e, "WRITE (not parsed)"),
            },
            _ => info!(stage = %stage, unit = %unit.to_text(), "WRITE"),
        }
    }
}

impl Sink for LogSink {
    fn config(&self) -> &StageConfig {
        &self.config
    }

    fn consume(&mut self, unit: DataUnit) -> StageFuture<'_, Result<(), BoxError>> {
        self.log_unit(&unit);
        self.consumed += 1;
        Box::pin(async { Ok(()) })
    }
}
