pub mod reading;
pub mod sensor;

pub use reading::{blank_row, Cell, RawPayload, Reading, Row};
pub use sensor::SensorDescriptor;
