pub mod aggregate;
pub mod assignment;
pub mod history;
pub mod live_state;
pub mod meter_reading;
pub mod reading;
pub mod vehicle_reading;

pub use aggregate::{MeterAggregate, TimeWindow, VehicleAggregate};
pub use assignment::Assignment;
pub use history::HistoricalRecord;
pub use live_state::{ChargingStatus, DeviceStatus, LiveState, ParseStatusError};
pub use meter_reading::MeterReading;
pub use reading::{DeviceClass, DeviceReading, Reading};
pub use vehicle_reading::VehicleReading;
