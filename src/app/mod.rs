//! Pluggable metering processors
//!
//! A processor turns one [`MeterPacket`] into zero or more candidate
//! [`Document`]s. Processors keep internal state, so every shard works on
//! its own duplicate made with [`ProcessorClone::clone_box`] and then
//! reset with [`MeteringProcessor::prepare`].

mod usage;

pub use usage::UsageProcessor;

use crate::datatype::MeterPacket;
use crate::document::Document;

/// Trait for per-application metric extraction
pub trait MeteringProcessor: ProcessorClone + Send + 'static {
    /// Stable name used in stats tags
    fn name(&self) -> &str;

    /// Reset internal state of a freshly duplicated instance
    fn prepare(&mut self);

    /// Extract candidate documents from one packet
    fn process(&mut self, packet: &MeterPacket, varied_tags: bool) -> Vec<Document>;
}

/// Duplication of a boxed processor
pub trait ProcessorClone {
    fn clone_box(&self) -> Box<dyn MeteringProcessor>;
}

impl<T> ProcessorClone for T
where
    T: MeteringProcessor + Clone,
{
    fn clone_box(&self) -> Box<dyn MeteringProcessor> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn MeteringProcessor> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Duplicate a prototype set into prepared, independent instances
pub fn duplicate_processors(
    prototypes: &[Box<dyn MeteringProcessor>],
) -> Vec<Box<dyn MeteringProcessor>> {
    prototypes
        .iter()
        .map(|proto| {
            let mut dup = proto.clone_box();
            dup.prepare();
            dup
        })
        .collect()
}
