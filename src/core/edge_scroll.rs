//! Edge-of-list detection from raw scroll input.
//!
//! Deltas follow nested-scroll conventions: a negative delta along the feed
//! axis pulls the next page in (forward), a positive one the previous page
//! (backward). An empty feed counts as both edges at once.
//!
//! A drag and the fling that ends it form one gesture; each edge is
//! reported at most once per gesture.

use log::debug;
use serde::{Deserialize, Serialize};

/// Scroll axis of the pager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    #[default]
    Vertical,
    Horizontal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScrollDirection {
    Forward,
    Backward,
}

/// Offset (drag) or velocity (pre-fling) available to the pager.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollDelta {
    pub x: f32,
    pub y: f32,
}

impl ScrollDelta {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn vertical(y: f32) -> Self {
        Self { x: 0.0, y }
    }

    pub fn horizontal(x: f32) -> Self {
        Self { x, y: 0.0 }
    }

    pub fn along(&self, axis: Axis) -> f32 {
        match axis {
            Axis::Vertical => self.y,
            Axis::Horizontal => self.x,
        }
    }
}

/// The user tried to scroll past the first or last loaded page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeReached {
    pub page: usize,
    pub at_start: bool,
    pub direction: ScrollDirection,
}

#[derive(Debug, Clone, Default)]
pub struct EdgeScrollDetector {
    axis: Axis,
    /// Edges already reported in the current gesture
    reported_start: bool,
    reported_end: bool,
}

impl EdgeScrollDetector {
    pub fn new(axis: Axis) -> Self {
        Self {
            axis,
            reported_start: false,
            reported_end: false,
        }
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    fn reported(&self, edge: &EdgeReached) -> bool {
        if edge.at_start { self.reported_start } else { self.reported_end }
    }

    fn reset(&mut self) {
        self.reported_start = false;
        self.reported_end = false;
    }

    /// Pure edge check for one delta along the feed axis.
    pub fn classify(delta: f32, page_count: usize, current_page: usize) -> Option<EdgeReached> {
        if delta == 0.0 || delta.is_nan() {
            return None;
        }
        let direction = if delta < 0.0 { ScrollDirection::Forward } else { ScrollDirection::Backward };
        let at_start = direction == ScrollDirection::Backward;

        let at_edge = if page_count == 0 {
            true
        } else if at_start {
            current_page == 0
        } else {
            current_page >= page_count - 1
        };

        at_edge.then_some(EdgeReached {
            page: current_page,
            at_start,
            direction,
        })
    }

    /// Drag step. Reports an edge once per gesture.
    pub fn on_scroll(&mut self, delta: ScrollDelta, page_count: usize, current_page: usize) -> Option<EdgeReached> {
        let edge = Self::classify(delta.along(self.axis), page_count, current_page)?;
        if self.reported(&edge) {
            return None;
        }
        if edge.at_start {
            self.reported_start = true;
        } else {
            self.reported_end = true;
        }
        debug!("EdgeScrollDetector: {:?} at page {} of {}", edge.direction, current_page, page_count);
        Some(edge)
    }

    /// Fling ending the gesture. Emits unless the drag already reported
    /// this edge, then resets the debounce.
    pub fn on_pre_fling(&mut self, velocity: ScrollDelta, page_count: usize, current_page: usize) -> Option<EdgeReached> {
        let edge = Self::classify(velocity.along(self.axis), page_count, current_page)
            .filter(|edge| !self.reported(edge));
        self.reset();
        if let Some(edge) = edge {
            debug!("EdgeScrollDetector: fling {:?} at page {} of {}", edge.direction, current_page, page_count);
        }
        edge
    }

    /// Gesture ended without a fling.
    pub fn end_gesture(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_edges() {
        let end = EdgeScrollDetector::classify(-3.0, 5, 4).unwrap();
        assert_eq!(end, EdgeReached { page: 4, at_start: false, direction: ScrollDirection::Forward });

        let start = EdgeScrollDetector::classify(2.0, 5, 0).unwrap();
        assert_eq!(start, EdgeReached { page: 0, at_start: true, direction: ScrollDirection::Backward });

        // Moving away from an edge is not an edge attempt
        assert!(EdgeScrollDetector::classify(2.0, 5, 4).is_none());
        assert!(EdgeScrollDetector::classify(-2.0, 5, 0).is_none());
        assert!(EdgeScrollDetector::classify(0.0, 5, 4).is_none());
        assert!(EdgeScrollDetector::classify(f32::NAN, 5, 4).is_none());
    }

    #[test]
    fn test_interior_pages_never_fire() {
        for page_count in 3..8 {
            for page in 1..page_count - 1 {
                for delta in [-100.0, -1.0, -0.01, 0.01, 1.0, 100.0] {
                    assert!(EdgeScrollDetector::classify(delta, page_count, page).is_none());
                }
            }
        }
    }

    #[test]
    fn test_empty_feed_is_both_edges() {
        let fwd = EdgeScrollDetector::classify(-1.0, 0, 0).unwrap();
        assert!(!fwd.at_start);
        let back = EdgeScrollDetector::classify(1.0, 0, 0).unwrap();
        assert!(back.at_start);
    }

    #[test]
    fn test_single_page_feed() {
        assert!(EdgeScrollDetector::classify(-1.0, 1, 0).is_some_and(|e| !e.at_start));
        assert!(EdgeScrollDetector::classify(1.0, 1, 0).is_some_and(|e| e.at_start));
    }

    #[test]
    fn test_debounced_per_gesture() {
        let mut d = EdgeScrollDetector::new(Axis::Vertical);
        assert!(d.on_scroll(ScrollDelta::vertical(-5.0), 3, 2).is_some());
        assert!(d.on_scroll(ScrollDelta::vertical(-5.0), 3, 2).is_none());
        assert!(d.on_scroll(ScrollDelta::vertical(-1.0), 3, 2).is_none());
        // Fling of the same gesture: already reported
        assert!(d.on_pre_fling(ScrollDelta::vertical(-800.0), 3, 2).is_none());

        // Next gesture reports again
        assert!(d.on_scroll(ScrollDelta::vertical(-5.0), 3, 2).is_some());
        d.end_gesture();
        assert!(d.on_scroll(ScrollDelta::vertical(-5.0), 3, 2).is_some());
    }

    #[test]
    fn test_fling_without_drag_report() {
        let mut d = EdgeScrollDetector::new(Axis::Vertical);
        assert!(d.on_scroll(ScrollDelta::vertical(-5.0), 3, 1).is_none());
        let edge = d.on_pre_fling(ScrollDelta::vertical(-900.0), 3, 2).unwrap();
        assert_eq!(edge.page, 2);
    }

    #[test]
    fn test_axis_selects_component() {
        let mut d = EdgeScrollDetector::new(Axis::Horizontal);
        // Vertical motion on a horizontal pager is ignored
        assert!(d.on_scroll(ScrollDelta::vertical(-5.0), 3, 2).is_none());
        assert!(d.on_scroll(ScrollDelta::horizontal(-5.0), 3, 2).is_some());
        assert_eq!(d.axis(), Axis::Horizontal);
    }

    #[test]
    fn test_empty_feed_reports_each_direction_once() {
        let mut d = EdgeScrollDetector::new(Axis::Vertical);
        assert!(d.on_scroll(ScrollDelta::vertical(-1.0), 0, 0).is_some());
        assert!(d.on_scroll(ScrollDelta::vertical(1.0), 0, 0).is_some());
        assert!(d.on_scroll(ScrollDelta::vertical(1.0), 0, 0).is_none());
        assert!(d.on_scroll(ScrollDelta::vertical(-1.0), 0, 0).is_none());
        assert!(d.on_pre_fling(ScrollDelta::vertical(-600.0), 0, 0).is_none());

        // Fresh gesture reports both again
        assert!(d.on_scroll(ScrollDelta::vertical(1.0), 0, 0).is_some());
        assert!(d.on_scroll(ScrollDelta::vertical(-1.0), 0, 0).is_some());
    }

    #[test]
    fn test_jitter_on_single_page_reports_each_edge_once() {
        let mut d = EdgeScrollDetector::new(Axis::Vertical);
        let emitted = [-1.0, 1.0, -1.0, 1.0, -1.0]
            .into_iter()
            .filter_map(|dy| d.on_scroll(ScrollDelta::vertical(dy), 1, 0))
            .collect::<Vec<_>>();
        assert_eq!(emitted.len(), 2);
        assert!(!emitted[0].at_start);
        assert!(emitted[1].at_start);

        d.end_gesture();
        assert!(d.on_scroll(ScrollDelta::vertical(-1.0), 1, 0).is_some());
    }
}
