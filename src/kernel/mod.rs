pub mod tasklet;
pub mod waitq;
pub mod workqueue;

pub use tasklet::Tasklet;
pub use waitq::WaitFlag;
pub use workqueue::{Work, WorkList, WorkMsg};
