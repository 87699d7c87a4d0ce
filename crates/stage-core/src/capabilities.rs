//! The stage capability contract.
//!
//! Every driver implements [`Stage`], a single async trait with four required
//! device operations (`position`, `move_unchecked`, `is_moving`,
//! `start_home`). Validation and waiting are provided methods composed from
//! those primitives and from the stage's [`AxisBounds`]:
//!
//! - `set_position` checks dimension and range before any I/O, then delegates
//!   to the driver's move encoding.
//! - `move_to` / `home` optionally wait for motion to settle using
//!   [`WaitOptions`].
//!
//! # Example
//!
//! ```rust,ignore
//! async fn raster(stage: &dyn Stage, points: &[Vector]) -> StageResult<()> {
//!     let opts = WaitOptions::default();
//!     for p in points {
//!         stage.move_to(p, Some(&opts)).await?;
//!     }
//!     Ok(())
//! }
//! ```

use crate::error::{Bound, StageError, StageResult};
use crate::motion::{poll_until, WaitOptions};
use crate::vector::Vector;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

// =============================================================================
// Motion state
// =============================================================================

/// Coarse, driver independent view of what a stage is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionState {
    /// Powered, referenced and at rest.
    Idle,
    /// Executing a move.
    Moving,
    /// Running a homing or referencing cycle.
    Homing,
    /// Halted by an alarm or fault; needs operator action.
    Alarm,
    /// Motor power off or controller disabled.
    Disabled,
    /// Needs homing before it accepts absolute moves.
    NotReferenced,
}

impl MotionState {
    /// Whether the stage is physically in motion.
    pub fn is_moving(&self) -> bool {
        matches!(self, MotionState::Moving | MotionState::Homing)
    }
}

impl std::fmt::Display for MotionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MotionState::Idle => "idle",
            MotionState::Moving => "moving",
            MotionState::Homing => "homing",
            MotionState::Alarm => "alarm",
            MotionState::Disabled => "disabled",
            MotionState::NotReferenced => "not_referenced",
        };
        f.pad(label)
    }
}

// =============================================================================
// Axis bounds
// =============================================================================

#[derive(Debug, Clone)]
struct Limits {
    minimums: Vec<Option<f64>>,
    maximums: Vec<Option<f64>>,
}

/// Per-axis software limits with a fixed axis count.
///
/// Individual entries may be unset (`None`), in which case that side of that
/// axis is unbounded.
#[derive(Debug)]
pub struct AxisBounds {
    num_axis: usize,
    limits: RwLock<Limits>,
}

impl AxisBounds {
    /// Unbounded limits for `num_axis` axes.
    pub fn new(num_axis: usize) -> Self {
        Self {
            num_axis,
            limits: RwLock::new(Limits {
                minimums: vec![None; num_axis],
                maximums: vec![None; num_axis],
            }),
        }
    }

    /// Builder form of [`set_minimums`](Self::set_minimums) and
    /// [`set_maximums`](Self::set_maximums).
    pub fn with_limits(
        self,
        minimums: Option<Vec<Option<f64>>>,
        maximums: Option<Vec<Option<f64>>>,
    ) -> StageResult<Self> {
        self.set_minimums(minimums)?;
        self.set_maximums(maximums)?;
        Ok(self)
    }

    /// Number of axes, fixed at construction.
    pub fn num_axis(&self) -> usize {
        self.num_axis
    }

    /// Current per-axis minimums.
    pub fn minimums(&self) -> Vec<Option<f64>> {
        self.limits.read().minimums.clone()
    }

    /// Current per-axis maximums.
    pub fn maximums(&self) -> Vec<Option<f64>> {
        self.limits.read().maximums.clone()
    }

    /// Replace the minimums. `None` clears every axis.
    pub fn set_minimums(&self, minimums: Option<Vec<Option<f64>>>) -> StageResult<()> {
        let minimums = self.normalize(minimums)?;
        self.limits.write().minimums = minimums;
        Ok(())
    }

    /// Replace the maximums. `None` clears every axis.
    pub fn set_maximums(&self, maximums: Option<Vec<Option<f64>>>) -> StageResult<()> {
        let maximums = self.normalize(maximums)?;
        self.limits.write().maximums = maximums;
        Ok(())
    }

    fn normalize(&self, values: Option<Vec<Option<f64>>>) -> StageResult<Vec<Option<f64>>> {
        match values {
            None => Ok(vec![None; self.num_axis]),
            Some(v) if v.len() == self.num_axis => Ok(v),
            Some(v) => Err(StageError::DimensionMismatch {
                expected: self.num_axis,
                actual: v.len(),
            }),
        }
    }

    /// Fail unless `value` has exactly `num_axis` components.
    pub fn check_dimension(&self, value: &Vector) -> StageResult<()> {
        if value.len() != self.num_axis {
            return Err(StageError::DimensionMismatch {
                expected: self.num_axis,
                actual: value.len(),
            });
        }
        Ok(())
    }

    /// Fail if any component is not finite or lies outside its configured
    /// limits.
    pub fn check_range(&self, value: &Vector) -> StageResult<()> {
        let limits = self.limits.read();
        for (axis, v) in value.iter().copied().enumerate() {
            if !v.is_finite() {
                return Err(StageError::InvalidArgument(format!(
                    "axis {axis} target {v} is not a finite number"
                )));
            }
            if let Some(Some(min)) = limits.minimums.get(axis) {
                if v < *min {
                    return Err(StageError::OutOfRange {
                        axis,
                        value: v,
                        limit: *min,
                        bound: Bound::Minimum,
                    });
                }
            }
            if let Some(Some(max)) = limits.maximums.get(axis) {
                if v > *max {
                    return Err(StageError::OutOfRange {
                        axis,
                        value: v,
                        limit: *max,
                        bound: Bound::Maximum,
                    });
                }
            }
        }
        Ok(())
    }

    /// Dimension check followed by range check.
    pub fn validate(&self, value: &Vector) -> StageResult<()> {
        self.check_dimension(value)?;
        self.check_range(value)
    }
}

// =============================================================================
// Stage trait
// =============================================================================

/// Capability: multi-axis positioning.
///
/// # Contract
/// - `position` always queries the device.
/// - `is_moving` is a live query, never cached.
/// - `move_unchecked` encodes a move; it may block until settled or return
///   immediately depending on the protocol. Callers should use
///   `set_position` / `move_to`, which validate first.
/// - All methods take `&self`; drivers use interior mutability for state.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Software limits, which also fix the axis count.
    fn bounds(&self) -> &AxisBounds;

    /// Number of axes.
    fn num_axis(&self) -> usize {
        self.bounds().num_axis()
    }

    /// Query the current position.
    async fn position(&self) -> StageResult<Vector>;

    /// Encode and send a move without validation.
    async fn move_unchecked(&self, target: &Vector) -> StageResult<()>;

    /// Live motion query.
    async fn is_moving(&self) -> StageResult<bool>;

    /// Start the protocol-specific homing sequence.
    async fn start_home(&self) -> StageResult<()>;

    /// Coarse motion state. Drivers with richer status words override this.
    async fn state(&self) -> StageResult<MotionState> {
        Ok(if self.is_moving().await? {
            MotionState::Moving
        } else {
            MotionState::Idle
        })
    }

    /// Validate `target` then move to it.
    async fn set_position(&self, target: &Vector) -> StageResult<()> {
        self.bounds().validate(target)?;
        self.move_unchecked(target).await
    }

    /// Poll `is_moving` until it reports false.
    async fn wait_move_finished(&self, opts: &WaitOptions) -> StageResult<()> {
        poll_until(opts, "move to finish", || async move {
            Ok::<bool, StageError>(!self.is_moving().await?)
        })
        .await
    }

    /// Set position and, if `wait` is given, wait for the move to settle.
    async fn move_to(&self, target: &Vector, wait: Option<&WaitOptions>) -> StageResult<()> {
        self.set_position(target).await?;
        if let Some(opts) = wait {
            self.wait_move_finished(opts).await?;
        }
        Ok(())
    }

    /// Home and, if `wait` is given, wait for the cycle to finish.
    async fn home(&self, wait: Option<&WaitOptions>) -> StageResult<()> {
        self.start_home().await?;
        if let Some(opts) = wait {
            self.wait_move_finished(opts).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// In-memory stage that records every move it is asked to perform.
    struct RecordingStage {
        bounds: AxisBounds,
        moves: Mutex<Vec<Vector>>,
        polls_until_idle: Mutex<u32>,
    }

    impl RecordingStage {
        fn new(num_axis: usize) -> Self {
            Self {
                bounds: AxisBounds::new(num_axis),
                moves: Mutex::new(Vec::new()),
                polls_until_idle: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl Stage for RecordingStage {
        fn bounds(&self) -> &AxisBounds {
            &self.bounds
        }

        async fn position(&self) -> StageResult<Vector> {
            Ok(self
                .moves
                .lock()
                .last()
                .cloned()
                .unwrap_or_else(|| Vector::zeros(self.num_axis())))
        }

        async fn move_unchecked(&self, target: &Vector) -> StageResult<()> {
            self.moves.lock().push(target.clone());
            *self.polls_until_idle.lock() = 3;
            Ok(())
        }

        async fn is_moving(&self) -> StageResult<bool> {
            let mut remaining = self.polls_until_idle.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(true);
            }
            Ok(false)
        }

        async fn start_home(&self) -> StageResult<()> {
            self.move_unchecked(&Vector::zeros(self.num_axis())).await
        }
    }

    #[tokio::test]
    async fn test_wrong_dimension_fails_before_move() {
        let stage = RecordingStage::new(3);
        let err = stage
            .set_position(&Vector::new([1.0, 2.0]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StageError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert!(stage.moves.lock().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_fails_before_move() {
        let stage = RecordingStage::new(3);
        stage
            .bounds()
            .set_maximums(Some(vec![Some(10.0), None, Some(5.0)]))
            .unwrap();
        stage
            .bounds()
            .set_minimums(Some(vec![None, Some(-1.0), None]))
            .unwrap();

        let err = stage
            .set_position(&Vector::new([1.0, 100.0, 6.0]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StageError::OutOfRange {
                axis: 2,
                bound: Bound::Maximum,
                ..
            }
        ));

        let err = stage
            .set_position(&Vector::new([1.0, -2.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StageError::OutOfRange {
                axis: 1,
                bound: Bound::Minimum,
                ..
            }
        ));
        assert!(stage.moves.lock().is_empty());

        stage
            .set_position(&Vector::new([10.0, 1e9, -1e9]))
            .await
            .unwrap();
        assert_eq!(stage.moves.lock().len(), 1);
    }

    #[test]
    fn test_bounds_dimension_checked_on_set() {
        let bounds = AxisBounds::new(2);
        assert!(bounds.set_minimums(Some(vec![Some(0.0)])).is_err());
        assert!(bounds.set_maximums(Some(vec![None, None, None])).is_err());
        bounds.set_minimums(Some(vec![Some(0.0), None])).unwrap();
        assert_eq!(bounds.minimums(), vec![Some(0.0), None]);
        bounds.set_minimums(None).unwrap();
        assert_eq!(bounds.minimums(), vec![None, None]);
    }

    #[tokio::test]
    async fn test_non_finite_target_fails_before_move() {
        let stage = RecordingStage::new(2);
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = stage
                .set_position(&Vector::new([0.0, bad]))
                .await
                .unwrap_err();
            assert!(matches!(err, StageError::InvalidArgument(_)), "{err}");
        }
        stage
            .bounds()
            .set_maximums(Some(vec![Some(1.0), Some(1.0)]))
            .unwrap();
        assert!(matches!(
            stage.bounds().check_range(&Vector::new([f64::NAN, 0.0])),
            Err(StageError::InvalidArgument(_))
        ));
        assert!(stage.moves.lock().is_empty());
    }

    #[test]
    fn test_unset_bounds_accept_anything() {
        let bounds = AxisBounds::new(2);
        assert!(bounds.validate(&Vector::new([-1e300, 1e300])).is_ok());
    }

    #[tokio::test]
    async fn test_move_to_waits_until_idle() {
        let stage = RecordingStage::new(2);
        let opts = WaitOptions::default().with_poll_interval(Duration::from_millis(1));
        stage
            .move_to(&Vector::new([1.0, 2.0]), Some(&opts))
            .await
            .unwrap();
        assert!(!stage.is_moving().await.unwrap());
        assert_eq!(stage.position().await.unwrap(), [1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_move_to_without_wait_returns_immediately() {
        let stage = RecordingStage::new(1);
        stage.move_to(&Vector::new([4.0]), None).await.unwrap();
        assert!(stage.is_moving().await.unwrap());
        assert_eq!(stage.state().await.unwrap(), MotionState::Moving);
    }

    #[tokio::test]
    async fn test_home_with_wait() {
        let stage = RecordingStage::new(2);
        let opts = WaitOptions::default().with_poll_interval(Duration::ZERO);
        stage.home(Some(&opts)).await.unwrap();
        assert_eq!(stage.state().await.unwrap(), MotionState::Idle);
        assert_eq!(stage.position().await.unwrap(), [0.0, 0.0]);
    }
}
