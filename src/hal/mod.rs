pub mod irq;
pub mod mmio;
pub mod platform;
pub mod regfield;

pub use irq::{IrqDomain, IrqHandler, IrqReturn, IRQF_SHARED};
pub use mmio::{MmioBank, RegisterBank, SimBank};
pub use platform::{DmaBuffer, PhyConfig, Platform};
pub use regfield::{Access, RegField};
