//! GRBL CNC router driver.
//!
//! This crate provides the [`CncRouter`] driver for GRBL v1.1 controllers
//! together with decoders for the controller's status reports, `$$`
//! settings table, alarms and errors.
//!
//! # Usage
//!
//! ```rust,ignore
//! use stage_driver_grbl::CncFactory;
//!
//! registry.register_factory(CncFactory);
//! ```

pub mod alarms;
mod cnc;
pub mod settings;
pub mod status;

pub use alarms::GrblFault;
pub use cnc::{CncConfig, CncFactory, CncRouter};
pub use settings::{GrblSetting, InvertMask, SettingValue, StatusReportMask};
pub use status::{FieldValue, GrblState, StatusReport};

/// Force the linker to include this crate.
///
/// Call this function from main() to ensure the driver factories are
/// linked into the final binary and not stripped by the linker.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<CncFactory>());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_does_not_panic() {
        link();
    }
}
