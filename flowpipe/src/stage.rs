//! Stage interfaces
//!
//! A pipeline is a chain of stages: one [`Source`], any number of
//! [`Transform`]s, one [`Sink`]. Each trait method returns a boxed future,
//! so the coordinator can hold heterogeneous stages behind trait objects
//! and suspend only at the stage's own I/O boundary.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::error::BoxError;
use crate::unit::{DataUnit, Mode};

/// Type alias for stage futures
pub type StageFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Explicit construction-time configuration carried by every stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageConfig {
    pub name: String,
    pub mode: Mode,
    /// Maximum buffered weight (bytes or units, depending on `mode`)
    pub high_water_mark: usize,
}

impl StageConfig {
    /// Config with the mode's default high-water-mark
    #[must_use]
    pub fn new(name: impl Into<String>, mode: Mode) -> Self {
        Self {
            name: name.into(),
            mode,
            high_water_mark: mode.default_high_water_mark(),
        }
    }

    #[must_use]
    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = high_water_mark;
        self
    }
}

/// Produces data units on demand
pub trait Source: Send {
    fn config(&self) -> &StageConfig;

    /// Produce the next unit, or `None` at end-of-data
    ///
    /// Only called when the downstream link has room, and never
    /// concurrently with itself. After `None` or an error the source is
    /// not asked again.
    fn produce(&mut self) -> StageFuture<'_, Result<Option<DataUnit>, BoxError>>;

    /// Release resources held for the lifetime of the stream
    ///
    /// Called exactly once, after end-of-data, a failure anywhere in the
    /// pipeline, or a stop request.
    fn close(&mut self) {}
}

/// Maps one unit to zero or one unit, preserving order
pub trait Transform: Send {
    fn config(&self) -> &StageConfig;

    /// Transform one unit; `None` drops it
    fn transform(&mut self, unit: DataUnit) -> StageFuture<'_, Result<Option<DataUnit>, BoxError>>;

    /// Called exactly once after the last unit, before end-of-data is
    /// passed downstream. May emit one terminal unit.
    fn flush(&mut self) -> StageFuture<'_, Result<Option<DataUnit>, BoxError>> {
        Box::pin(async { Ok(None) })
    }
}

/// Consumes units with a terminal side effect
pub trait Sink: Send {
    fn config(&self) -> &StageConfig;

    /// Finish the side effect for one unit; `Ok(())` is the Ack
    fn consume(&mut self, unit: DataUnit) -> StageFuture<'_, Result<(), BoxError>>;
}

/// Direction capability of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Produces,
    Both,
    Consumes,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Produces => write!(f, "produces"),
            Capability::Both => write!(f, "both"),
            Capability::Consumes => write!(f, "consumes"),
        }
    }
}

/// A stage of any role
pub enum Stage {
    Source(Box<dyn Source>),
    Transform(Box<dyn Transform>),
    Sink(Box<dyn Sink>),
}

impl Stage {
    #[must_use]
    pub fn capability(&self) -> Capability {
        match self {
            Stage::Source(_) => Capability::Produces,
            Stage::Transform(_) => Capability::Both,
            Stage::Sink(_) => Capability::Consumes,
        }
    }

    #[must_use]
    pub fn config(&self) -> &StageConfig {
        match self {
            Stage::Source(s) => s.config(),
            Stage::Transform(t) => t.config(),
            Stage::Sink(s) => s.config(),
        }
    }

    pub fn source(source: impl Source + 'static) -> Self {
        Stage::Source(Box::new(source))
    }

    pub fn transform(transform: impl Transform + 'static) -> Self {
        Stage::Transform(Box::new(transform))
    }

    pub fn sink(sink: impl Sink + 'static) -> Self {
        Stage::Sink(Box::new(sink))
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let config = self.config();
        write!(
            f,
            "Stage({}, name={}, mode={}, hwm={})",
            self.capability(),
            config.name,
            config.mode,
            config.high_water_mark
        )
    }
}
