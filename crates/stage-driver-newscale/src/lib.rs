//! New Scale Technologies M3-FS focus module driver.
//!
//! This crate provides the [`M3fs`] driver, its [`M3fsFactory`] and the
//! `<NN data>\r` frame codec in [`frame`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use stage_driver_newscale::M3fsFactory;
//!
//! registry.register_factory(M3fsFactory);
//! ```

pub mod frame;
mod m3fs;

pub use frame::{ClosedLoopStatus, M3fsCommand};
pub use m3fs::{M3fs, M3fsConfig, M3fsFactory, SUPPORTED_VERSIONS};

/// Force the linker to include this crate.
///
/// Call this function from main() to ensure the driver factories are
/// linked into the final binary and not stripped by the linker.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<M3fsFactory>());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_does_not_panic() {
        link();
    }
}
