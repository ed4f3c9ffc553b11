pub mod camsys;
pub mod sim;

#[cfg(test)]
mod scenarios;

pub use camsys::CamSys;
pub use sim::{RecordingHost, RecordingVideo, RigOptions, SimPlatform, SimRig};
