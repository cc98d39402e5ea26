pub mod capture;
pub mod controller;
pub mod frame;
pub mod loop_worker;
pub mod mock_sensor;

pub use capture::{CaptureSource, MjpegCapture};
pub use controller::{CollectionScheduler, SchedulerStatus};
pub use loop_worker::SchedulerTiming;
pub use mock_sensor::MockSensorGenerator;
