//! Request middleware that runs outside the resilience layers.

pub mod instrument;

pub use instrument::Instrument;
