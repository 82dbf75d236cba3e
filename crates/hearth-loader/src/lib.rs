//! Background load scheduler: drains the model catalog as a FIFO queue,
//! initializes one model at a time, and promotes the first success to the
//! active selection.

mod loader;
mod plan;

pub use loader::{LoadProgress, LoaderOptions, ModelLoader, ModelOverview};
pub use plan::{CompletionEffect, LoadPlan};
