mod controller;
mod device;
mod file_device;
#[cfg(test)]
mod tests;

pub use controller::{CaptureController, PhotoState, VideoState};
pub use device::{Capability, CaptureDevice, PermissionStatus, RecordingOptions};
pub use file_device::FileCaptureDevice;
