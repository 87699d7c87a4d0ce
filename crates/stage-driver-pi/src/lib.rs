//! Physik Instrumente GCS stage driver.
//!
//! This crate provides the [`PiStage`] driver for daisy-chained PI
//! controllers speaking the General Command Set, and the GCS error table in
//! [`errors`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use stage_driver_pi::PiFactory;
//!
//! registry.register_factory(PiFactory);
//! ```

pub mod errors;
mod pi;

pub use errors::PiError;
pub use pi::{PiConfig, PiFactory, PiStage, ReferencingMethod, MANUFACTURER};

/// Force the linker to include this crate.
///
/// Call this function from main() to ensure the driver factories are
/// linked into the final binary and not stripped by the linker.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<PiFactory>());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_does_not_panic() {
        link();
    }
}
