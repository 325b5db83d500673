//! Data structures for meter data.
//!
//! Measurement modes and the decoded readings produced from meter responses.

pub mod mode;
pub mod reading;

pub use mode::MeasurementMode;
pub use reading::Reading;
