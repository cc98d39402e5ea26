pub mod category;
pub mod event;

pub use category::{Category, CategorySet, Coerced};
pub use event::{EventState, ImageRef, ObservationEvent, SensorReading, StateCounts};
