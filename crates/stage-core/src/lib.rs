//! `stage-core`
//!
//! Core types and the capability contract for motorized positioning stages.
//!
//! ## Layers
//!
//! - **Transport**: [`serial`] framing helpers over a shared async port
//! - **Data**: [`vector::Vector`] positions, [`capabilities::AxisBounds`]
//! - **Contract**: [`capabilities::Stage`], implemented once per protocol driver
//! - **Orchestration**: [`motion`] wait loops with timeout and cancellation
//!
//! Driver crates depend on this crate and export a
//! [`driver::DriverFactory`]; `stage-hardware` wires factories to
//! configuration.
//!
//! ## Example
//!
//! ```rust,ignore
//! use stage_core::prelude::*;
//!
//! async fn go(stage: &dyn Stage) -> StageResult<()> {
//!     stage.move_to(&Vector::new([1.0, 2.0, 3.0]), Some(&WaitOptions::default())).await?;
//!     println!("now at {}", stage.position().await?);
//!     Ok(())
//! }
//! ```

pub mod autofocus;
pub mod capabilities;
pub mod driver;
pub mod error;
pub mod limits;
pub mod motion;
pub mod serial;
pub mod vector;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{DeviceFault, StageError, StageResult};
pub use vector::Vector;

/// Commonly used items.
pub mod prelude {
    pub use crate::capabilities::{AxisBounds, MotionState, Stage};
    pub use crate::error::{DeviceFault, StageError, StageResult};
    pub use crate::motion::{CancelToken, WaitOptions};
    pub use crate::vector::Vector;
}
