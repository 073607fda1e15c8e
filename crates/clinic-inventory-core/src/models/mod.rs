//! Domain models for the clinic inventory engine.

mod movement;
mod plan;
mod product;
mod stock;
mod usage;

pub use movement::*;
pub use plan::*;
pub use product::*;
pub use stock::*;
pub use usage::*;
