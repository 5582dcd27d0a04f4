//! Ordered correspondence points for one panel.
//!
//! Points live in image space. A point's index is its position in the
//! list, and the index pairs it with the same-indexed point on the other
//! panel, so removal is limited to the tail or an explicit index.

use serde::{Deserialize, Serialize};

use crate::types::{IatError, Point};

/// Outcome of [`ControlPointManager::add_or_select`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    /// Index of the selected point.
    pub index: usize,
    /// `true` if the point was appended by this call.
    pub created: bool,
}

/// A capped, ordered list of control points with a single selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPointManager {
    points: Vec<Point>,
    max: usize,
    selected: Option<usize>,
}

impl ControlPointManager {
    /// An empty list holding at most `max` points.
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self {
            points: Vec::with_capacity(max),
            max,
            selected: None,
        }
    }

    /// The points in index order.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Configured capacity.
    #[must_use]
    pub const fn max(&self) -> usize {
        self.max
    }

    /// Number of points placed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// `true` if no point has been placed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// `true` once [`max`](Self::max) points are placed.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.points.len() >= self.max
    }

    /// Index of the selected point, if any.
    #[must_use]
    pub const fn selected(&self) -> Option<usize> {
        self.selected
    }

    /// Index of the first point whose square of half-width `hit_radius`
    /// contains `p`.
    #[must_use]
    pub fn hit_test(&self, p: Point, hit_radius: f64) -> Option<usize> {
        self.points
            .iter()
            .position(|q| (q.x - p.x).abs() <= hit_radius && (q.y - p.y).abs() <= hit_radius)
    }

    /// Select the point under `p`, or append a new one there.
    ///
    /// # Errors
    ///
    /// Returns [`IatError::NonFinitePoint`] if `p` has a NaN or
    /// infinite coordinate.
    /// Returns [`IatError::MaxControlPointsReached`] if nothing is hit
    /// and the list is full. The list is unchanged in both cases.
    pub fn add_or_select(&mut self, p: Point, hit_radius: f64) -> Result<Selection, IatError> {
        if !p.is_finite() {
            return Err(IatError::NonFinitePoint);
        }
        if let Some(index) = self.hit_test(p, hit_radius) {
            self.selected = Some(index);
            return Ok(Selection {
                index,
                created: false,
            });
        }
        if self.is_full() {
            return Err(IatError::MaxControlPointsReached { max: self.max });
        }
        self.points.push(p);
        let index = self.points.len() - 1;
        self.selected = Some(index);
        tracing::debug!(index, x = p.x, y = p.y, "control point added");
        Ok(Selection {
            index,
            created: true,
        })
    }

    /// Move the selected point to `p`. Returns `false` if nothing is
    /// selected or `p` is not finite.
    pub fn move_selected(&mut self, p: Point) -> bool {
        self.selected.is_some_and(|i| self.move_point(i, p))
    }

    /// Move point `index` to `p`. Returns `false` if `index` is out of
    /// range or `p` is not finite.
    pub fn move_point(&mut self, index: usize, p: Point) -> bool {
        p.is_finite() && self.points.get_mut(index).map(|q| *q = p).is_some()
    }

    /// Drop the selection without changing any point.
    pub const fn release(&mut self) {
        self.selected = None;
    }

    /// Remove and return point `index`. Later points shift down by one.
    pub fn remove(&mut self, index: usize) -> Option<Point> {
        if index >= self.points.len() {
            return None;
        }
        let removed = self.points.remove(index);
        self.selected = match self.selected {
            Some(s) if s == index => None,
            Some(s) if s > index => Some(s - 1),
            other => other,
        };
        Some(removed)
    }

    /// Remove and return the tail point. Empty lists are left alone.
    pub fn delete_last(&mut self) -> Option<Point> {
        let last = self.points.len().checked_sub(1)?;
        self.remove(last)
    }

    /// Remove every point.
    pub fn clear(&mut self) {
        self.points.clear();
        self.selected = None;
    }

    /// Replace every point, keeping at most [`max`](Self::max) finite
    /// ones.
    pub fn replace_all(&mut self, points: impl IntoIterator<Item = Point>) {
        self.points = points
            .into_iter()
            .filter(|p| p.is_finite())
            .take(self.max)
            .collect();
        self.selected = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const R: f64 = 20.0;

    fn manager_with(points: &[(f64, f64)]) -> ControlPointManager {
        let mut m = ControlPointManager::new(4);
        for &(x, y) in points {
            m.add_or_select(Point::new(x, y), R).unwrap();
        }
        m
    }

    #[test]
    fn fifth_point_is_rejected_and_list_keeps_four() {
        let mut m = manager_with(&[(0.0, 0.0), (100.0, 0.0), (0.0, 100.0), (100.0, 100.0)]);
        let result = m.add_or_select(Point::new(50.0, 50.0), R);
        assert_eq!(result, Err(IatError::MaxControlPointsReached { max: 4 }));
        assert_eq!(m.len(), 4);
    }

    #[test]
    fn click_near_existing_point_selects_it() {
        let mut m = manager_with(&[(0.0, 0.0), (100.0, 100.0)]);
        let sel = m.add_or_select(Point::new(110.0, 85.0), R).unwrap();
        assert_eq!(
            sel,
            Selection {
                index: 1,
                created: false
            }
        );
        assert_eq!(m.len(), 2);
        assert_eq!(m.selected(), Some(1));
    }

    #[test]
    fn hit_test_is_a_square_not_a_circle() {
        let m = manager_with(&[(0.0, 0.0)]);
        // Distance ~28.3 exceeds the radius but lies inside the square.
        assert_eq!(m.hit_test(Point::new(20.0, 20.0), R), Some(0));
        assert_eq!(m.hit_test(Point::new(20.5, 0.0), R), None);
    }

    #[test]
    fn selection_works_when_full() {
        let mut m = manager_with(&[(0.0, 0.0), (100.0, 0.0), (0.0, 100.0), (100.0, 100.0)]);
        let sel = m.add_or_select(Point::new(95.0, 5.0), R).unwrap();
        assert_eq!(sel.index, 1);
        assert!(!sel.created);
    }

    #[test]
    fn move_selected_updates_point() {
        let mut m = manager_with(&[(0.0, 0.0), (100.0, 0.0)]);
        m.add_or_select(Point::new(1.0, 1.0), R).unwrap();
        assert!(m.move_selected(Point::new(5.0, 6.0)));
        assert_eq!(m.points()[0], Point::new(5.0, 6.0));
        m.release();
        assert!(!m.move_selected(Point::new(9.0, 9.0)));
        assert_eq!(m.points()[0], Point::new(5.0, 6.0));
    }

    #[test]
    fn non_finite_points_are_rejected() {
        let mut m = manager_with(&[(0.0, 0.0)]);
        for p in [
            Point::new(f64::NAN, 5.0),
            Point::new(50.0, f64::INFINITY),
            Point::new(f64::NEG_INFINITY, f64::NAN),
        ] {
            assert_eq!(m.add_or_select(p, R), Err(IatError::NonFinitePoint));
        }
        assert_eq!(m.len(), 1);

        m.add_or_select(Point::new(0.0, 0.0), R).unwrap();
        assert!(!m.move_selected(Point::new(f64::NAN, 1.0)));
        assert_eq!(m.points()[0], Point::new(0.0, 0.0));

        m.replace_all([Point::new(1.0, 1.0), Point::new(f64::NAN, 0.0)]);
        assert_eq!(m.points(), &[Point::new(1.0, 1.0)]);
    }

    #[test]
    fn delete_last_on_empty_is_a_no_op() {
        let mut m = ControlPointManager::new(4);
        assert_eq!(m.delete_last(), None);
        assert!(m.is_empty());
    }

    #[test]
    fn delete_last_removes_tail() {
        let mut m = manager_with(&[(0.0, 0.0), (100.0, 0.0)]);
        assert_eq!(m.delete_last(), Some(Point::new(100.0, 0.0)));
        assert_eq!(m.points(), &[Point::new(0.0, 0.0)]);
        assert_eq!(m.selected(), None);
    }

    #[test]
    fn remove_by_index_shifts_selection() {
        let mut m = manager_with(&[(0.0, 0.0), (100.0, 0.0), (200.0, 0.0)]);
        assert_eq!(m.selected(), Some(2));
        assert_eq!(m.remove(0), Some(Point::new(0.0, 0.0)));
        assert_eq!(m.selected(), Some(1));
        assert_eq!(m.remove(7), None);
    }

    #[test]
    fn clear_empties_list() {
        let mut m = manager_with(&[(0.0, 0.0), (100.0, 0.0)]);
        m.clear();
        assert!(m.is_empty());
        assert_eq!(m.selected(), None);
    }

    #[test]
    fn replace_all_truncates_to_capacity() {
        let mut m = ControlPointManager::new(4);
        m.replace_all((0..6).map(|i| Point::new(f64::from(i), 0.0)));
        assert_eq!(m.len(), 4);
        assert!(m.is_full());
    }
}
