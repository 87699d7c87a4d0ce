//! Corvus Eco stage controller driver.
//!
//! This crate provides the [`Corvus`] driver for the ITK Corvus Eco three
//! axis controller and its [`CorvusFactory`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use stage_driver_corvus::CorvusFactory;
//!
//! registry.register_factory(CorvusFactory);
//! ```

mod corvus;

pub use corvus::{Corvus, CorvusConfig, CorvusFactory, DEFAULT_BAUD_RATE};

/// Force the linker to include this crate.
///
/// Call this function from main() to ensure the driver factories are
/// linked into the final binary and not stripped by the linker.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<CorvusFactory>());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_does_not_panic() {
        link();
    }
}
