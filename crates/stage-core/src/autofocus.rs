//! Focus depth interpolation for scanning.
//!
//! Given focused reference points `(x, y, z)`, [`Autofocus`] estimates the
//! focus depth at any other `(x, y)` by fitting a plane through the first
//! three registered points.
//!
//! Always bound-check the returned depth before moving: a bad registration
//! can produce large displacements.

use crate::error::{StageError, StageResult};

/// Registered focus points and plane interpolation.
#[derive(Debug, Clone, Default)]
pub struct Autofocus {
    points: Vec<[f64; 3]>,
}

impl Autofocus {
    /// Empty registration set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a focused point.
    pub fn register(&mut self, x: f64, y: f64, z: f64) {
        self.points.push([x, y, z]);
    }

    /// Remove every registered point.
    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Number of registered points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Registered points in registration order.
    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    /// Estimated focus depth at `(x, y)`.
    pub fn focus(&self, x: f64, y: f64) -> StageResult<f64> {
        let [a, b, c] = match self.points.as_slice() {
            [a, b, c, ..] => [*a, *b, *c],
            _ => return Err(StageError::NotEnoughFocusPoints(self.points.len())),
        };

        let ab = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
        let ac = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
        let ap = [x - a[0], y - a[1]];

        // Express ap in the (ab, ac) basis of the XY plane.
        let det = ab[0] * ac[1] - ac[0] * ab[1];
        if det.abs() < f64::EPSILON {
            return Err(StageError::DegenerateFocusPlane);
        }
        let u = (ap[0] * ac[1] - ac[0] * ap[1]) / det;
        let v = (ab[0] * ap[1] - ap[0] * ab[1]) / det;

        Ok(a[2] + ab[2] * u + ac[2] * v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_clear() {
        let mut af = Autofocus::new();
        assert_eq!(af.len(), 0);
        af.register(1.0, 2.0, 3.0);
        assert_eq!(af.len(), 1);
        af.clear();
        assert!(af.is_empty());
    }

    #[test]
    fn test_focus_needs_three_points() {
        let mut af = Autofocus::new();
        assert!(matches!(
            af.focus(3.0, 3.0),
            Err(StageError::NotEnoughFocusPoints(0))
        ));
        af.register(2.0, 2.0, 10.0);
        af.register(2.0, 3.0, 11.0);
        assert!(matches!(
            af.focus(3.0, 3.0),
            Err(StageError::NotEnoughFocusPoints(2))
        ));
        af.register(3.0, 2.0, 11.0);
        assert!((af.focus(3.0, 3.0).unwrap() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_focus_on_reference_points() {
        let mut af = Autofocus::new();
        af.register(0.0, 0.0, 1.0);
        af.register(10.0, 0.0, 2.0);
        af.register(0.0, 10.0, 3.0);
        for [x, y, z] in af.points().to_vec() {
            assert!((af.focus(x, y).unwrap() - z).abs() < 1e-9);
        }
        // Extra points beyond the third do not change the plane.
        af.register(5.0, 5.0, 100.0);
        assert!((af.focus(5.0, 5.0).unwrap() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_collinear_points_rejected() {
        let mut af = Autofocus::new();
        af.register(0.0, 0.0, 0.0);
        af.register(1.0, 1.0, 1.0);
        af.register(2.0, 2.0, 5.0);
        assert!(matches!(
            af.focus(1.0, 0.0),
            Err(StageError::DegenerateFocusPlane)
        ));
    }
}
