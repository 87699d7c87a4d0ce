//! Pololu Tic stepper motor controller driver.
//!
//! This crate provides the [`Tic`] driver, its [`TicFactory`], and the
//! [`ControlTransport`] seam it talks through. The libusb backed transport
//! lives behind the `usb` feature.
//!
//! # Usage
//!
//! ```rust,ignore
//! use stage_driver_pololu::TicFactory;
//!
//! registry.register_factory(TicFactory);
//! ```

mod tic;
mod transport;
#[cfg(feature = "usb")]
pub mod usb;
pub mod variables;

pub use tic::{KeepAlive, Tic, TicConfig, TicFactory};
pub use transport::{ControlTransport, TicLink, REQUEST_TYPE_IN, REQUEST_TYPE_OUT};
pub use variables::{
    ErrorStatus, MiscFlags, OperationState, PlanningMode, TicCommand, TicDirection, TicVariable,
};

/// Force the linker to include this crate.
///
/// Call this function from main() to ensure the driver factories are
/// linked into the final binary and not stripped by the linker.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<TicFactory>());
}
