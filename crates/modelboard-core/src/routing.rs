//! Orthogonal connection routing.
//!
//! Connections run between the midpoints of the facing edges of their two
//! items with at most one 90 degree turn. Manually edited routes keep their
//! interior waypoints; only the ends follow the items.

use std::collections::HashMap;

use kurbo::{Point, Rect, Vec2};
use thiserror::Error;

use crate::model::{Connection, ConnectionId, Item, ItemId};
use crate::projection::Projection;

const EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("route has no segment {index}")]
    NoSuchSegment { index: usize },
    #[error("segment {index} is diagonal")]
    NotAxisAligned { index: usize },
    #[error("segment {index} cannot move along its own axis")]
    CrossAxisDrag { index: usize },
}

/// An edge of a rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Top,
    Bottom,
    Left,
    Right,
}

impl Side {
    pub fn midpoint(self, rect: Rect) -> Point {
        let c = rect.center();
        match self {
            Side::Top => Point::new(c.x, rect.y0),
            Side::Bottom => Point::new(c.x, rect.y1),
            Side::Left => Point::new(rect.x0, c.y),
            Side::Right => Point::new(rect.x1, c.y),
        }
    }

    /// Whether a route leaves this side horizontally.
    fn exits_horizontally(self) -> bool {
        matches!(self, Side::Left | Side::Right)
    }
}

/// Orientation of a route segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentAxis {
    Horizontal,
    Vertical,
}

/// A draggable handle in the middle of a segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentHandle {
    /// Index of the segment's first point.
    pub index: usize,
    pub position: Point,
    pub axis: SegmentAxis,
}

fn segment_axis(a: Point, b: Point) -> Option<SegmentAxis> {
    let flat_y = (a.y - b.y).abs() < EPSILON;
    let flat_x = (a.x - b.x).abs() < EPSILON;
    match (flat_x, flat_y) {
        (false, true) => Some(SegmentAxis::Horizontal),
        (true, false) => Some(SegmentAxis::Vertical),
        _ => None,
    }
}

fn is_axis_aligned(a: Point, b: Point) -> bool {
    (a.x - b.x).abs() < EPSILON || (a.y - b.y).abs() < EPSILON
}

/// The sides of `from` and `to` that face each other, chosen by the dominant
/// axis of center separation.
pub fn facing_sides(from: Rect, to: Rect) -> (Side, Side) {
    let d = to.center() - from.center();
    if d.x.abs() >= d.y.abs() {
        if d.x >= 0.0 {
            (Side::Right, Side::Left)
        } else {
            (Side::Left, Side::Right)
        }
    } else if d.y >= 0.0 {
        (Side::Bottom, Side::Top)
    } else {
        (Side::Top, Side::Bottom)
    }
}

/// Route between facing edge midpoints: straight when aligned, otherwise one elbow.
pub fn default_route(from: Rect, to: Rect) -> Vec<Point> {
    let (from_side, to_side) = facing_sides(from, to);
    let start = from_side.midpoint(from);
    let end = to_side.midpoint(to);
    if is_axis_aligned(start, end) {
        return vec![start, end];
    }
    vec![start, elbow(start, from_side, end), end]
}

/// Corner joining `anchor` (leaving through `side`) to `next`.
fn elbow(anchor: Point, side: Side, next: Point) -> Point {
    if side.exits_horizontally() {
        Point::new(next.x, anchor.y)
    } else {
        Point::new(anchor.x, next.y)
    }
}

/// The point on the boundary of `rect` closest to `p`, and its side.
pub fn closest_boundary_point(rect: Rect, p: Point) -> (Point, Side) {
    let c = Point::new(p.x.clamp(rect.x0, rect.x1), p.y.clamp(rect.y0, rect.y1));
    let candidates = [
        (c.y - rect.y0, Side::Top),
        (rect.y1 - c.y, Side::Bottom),
        (c.x - rect.x0, Side::Left),
        (rect.x1 - c.x, Side::Right),
    ];
    let mut best = candidates[0];
    for candidate in &candidates[1..] {
        if candidate.0 < best.0 {
            best = *candidate;
        }
    }
    let side = best.1;
    let point = match side {
        Side::Top => Point::new(c.x, rect.y0),
        Side::Bottom => Point::new(c.x, rect.y1),
        Side::Left => Point::new(rect.x0, c.y),
        Side::Right => Point::new(rect.x1, c.y),
    };
    (point, side)
}

/// Re-align the end segment `anchor -> next`.
///
/// The anchor slides along its side when `next` is within the side's span;
/// otherwise an elbow is returned to insert between them.
fn repair_end(anchor: Point, side: Side, rect: Rect, next: Point) -> (Point, Option<Point>) {
    if is_axis_aligned(anchor, next) {
        return (anchor, None);
    }
    if side.exits_horizontally() {
        if (rect.y0..=rect.y1).contains(&next.y) {
            return (Point::new(anchor.x, next.y), None);
        }
    } else if (rect.x0..=rect.x1).contains(&next.x) {
        return (Point::new(next.x, anchor.y), None);
    }
    (anchor, Some(elbow(anchor, side, next)))
}

/// Geometry of a connection for the current item boxes.
pub fn route(connection: &Connection, from: Rect, to: Rect) -> Vec<Point> {
    let manual = match connection.points.as_deref() {
        Some(points) if points.len() >= 2 => points,
        _ => return default_route(from, to),
    };
    let mut points = manual.to_vec();

    let (start, start_side) = closest_boundary_point(from, points[0]);
    let (start, start_elbow) = repair_end(start, start_side, from, points[1]);
    points[0] = start;
    if let Some(corner) = start_elbow {
        points.insert(1, corner);
    }

    let last = points.len() - 1;
    let (end, end_side) = closest_boundary_point(to, points[last]);
    let (end, end_elbow) = repair_end(end, end_side, to, points[last - 1]);
    points[last] = end;
    if let Some(corner) = end_elbow {
        points.insert(last, corner);
    }
    points
}

/// Flat `[x0, y0, x1, y1, ...]` list for the render surface.
pub fn flatten(points: &[Point]) -> Vec<f64> {
    points.iter().flat_map(|p| [p.x, p.y]).collect()
}

/// Routes for every connection with items at their live positions.
///
/// `positions` overrides the top-left corner of items being dragged, so
/// connections follow a gesture before it is committed.
pub fn live_routes(projection: &Projection, positions: &HashMap<ItemId, Point>) -> Vec<(ConnectionId, Vec<Point>)> {
    let rect_of = |item: &Item| match positions.get(&item.id) {
        Some(p) => Rect::new(p.x, p.y, p.x + item.width, p.y + item.height),
        None => item.bounds(),
    };
    projection
        .connections()
        .iter()
        .filter_map(|conn| {
            let from = projection.item(&conn.from)?;
            let to = projection.item(&conn.to)?;
            Some((conn.id.clone(), route(conn, rect_of(from), rect_of(to))))
        })
        .collect()
}

/// Handles for every axis-aligned segment.
pub fn segment_handles(points: &[Point]) -> Vec<SegmentHandle> {
    points
        .windows(2)
        .enumerate()
        .filter_map(|(index, pair)| {
            let axis = segment_axis(pair[0], pair[1])?;
            Some(SegmentHandle {
                index,
                position: pair[0].midpoint(pair[1]),
                axis,
            })
        })
        .collect()
}

/// Index of the segment handle under `point`.
pub fn hit_test_segment_handle(points: &[Point], point: Point, tolerance: f64) -> Option<usize> {
    segment_handles(points)
        .into_iter()
        .find(|handle| handle.position.distance(point) <= tolerance)
        .map(|handle| handle.index)
}

/// Move segment `index` perpendicular to itself.
///
/// A horizontal segment only moves in Y and a vertical one only in X; the
/// other component of `delta` is discarded. A drag with no usable component
/// is rejected rather than ignored.
pub fn drag_segment(points: &[Point], index: usize, delta: Vec2) -> Result<Vec<Point>, RoutingError> {
    if index + 1 >= points.len() {
        return Err(RoutingError::NoSuchSegment { index });
    }
    let axis = segment_axis(points[index], points[index + 1]).ok_or(RoutingError::NotAxisAligned { index })?;
    let (along, across) = match axis {
        SegmentAxis::Horizontal => (delta.x, delta.y),
        SegmentAxis::Vertical => (delta.y, delta.x),
    };
    if across.abs() < EPSILON && along.abs() >= EPSILON {
        return Err(RoutingError::CrossAxisDrag { index });
    }
    let mut moved = points.to_vec();
    for p in &mut moved[index..=index + 1] {
        match axis {
            SegmentAxis::Horizontal => p.y += across,
            SegmentAxis::Vertical => p.x += across,
        }
    }
    Ok(moved)
}

/// Which end of a connection an anchor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorEnd {
    From,
    To,
}

/// Outcome of releasing a dragged anchor.
#[derive(Debug, Clone, PartialEq)]
pub enum AnchorDrop {
    /// Commit this connection: new endpoint, default routing.
    Retarget(Connection),
    /// Leave the connection as it was.
    SnapBack,
}

/// Resolve an anchor released at `point`.
///
/// Dropping on a different connectable item retargets that end and clears
/// manual points. Dropping on empty canvas, on the current endpoint, or on
/// the opposite endpoint snaps back.
pub fn drop_anchor(connection: &Connection, end: AnchorEnd, point: Point, projection: &Projection) -> AnchorDrop {
    let Some(target) = projection
        .items()
        .iter()
        .rev()
        .find(|item| item.tag().is_connectable() && item.bounds().contains(point))
    else {
        return AnchorDrop::SnapBack;
    };
    let (current, other) = match end {
        AnchorEnd::From => (&connection.from, &connection.to),
        AnchorEnd::To => (&connection.to, &connection.from),
    };
    if &target.id == current || &target.id == other {
        return AnchorDrop::SnapBack;
    }
    let mut retargeted = connection.clone();
    match end {
        AnchorEnd::From => retargeted.from = target.id.clone(),
        AnchorEnd::To => retargeted.to = target.id.clone(),
    }
    retargeted.points = None;
    AnchorDrop::Retarget(retargeted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConnectionKind, ItemKind, NewConnection, NewItem};

    fn conn(points: Option<Vec<Point>>) -> Connection {
        let mut c = NewConnection::new("a".to_string(), "b".to_string(), ConnectionKind::Plain).into_connection("c".to_string());
        c.points = points;
        c
    }

    fn assert_orthogonal(points: &[Point]) {
        for pair in points.windows(2) {
            assert!(is_axis_aligned(pair[0], pair[1]), "diagonal segment {:?}", pair);
        }
    }

    #[test]
    fn test_default_route_aligned() {
        let a = Rect::new(0.0, 0.0, 100.0, 50.0);
        let b = Rect::new(300.0, 0.0, 400.0, 50.0);
        let points = default_route(a, b);
        assert_eq!(flatten(&points), vec![100.0, 25.0, 300.0, 25.0]);
    }

    #[test]
    fn test_default_route_vertical() {
        let a = Rect::new(0.0, 0.0, 100.0, 50.0);
        let b = Rect::new(0.0, 300.0, 100.0, 350.0);
        assert_eq!(flatten(&default_route(a, b)), vec![50.0, 50.0, 50.0, 300.0]);
        assert_eq!(flatten(&default_route(b, a)), vec![50.0, 300.0, 50.0, 50.0]);
    }

    #[test]
    fn test_default_route_single_turn() {
        let a = Rect::new(0.0, 0.0, 100.0, 50.0);
        let b = Rect::new(300.0, 100.0, 400.0, 150.0);
        let points = default_route(a, b);
        assert_eq!(points.len(), 3);
        assert_eq!(points[1], Point::new(300.0, 25.0));
        assert_orthogonal(&points);
    }

    #[test]
    fn test_closest_boundary_point() {
        let rect = Rect::new(0.0, 0.0, 100.0, 50.0);
        assert_eq!(closest_boundary_point(rect, Point::new(150.0, 20.0)), (Point::new(100.0, 20.0), Side::Right));
        assert_eq!(closest_boundary_point(rect, Point::new(50.0, 5.0)), (Point::new(50.0, 0.0), Side::Top));
        assert_eq!(closest_boundary_point(rect, Point::new(-10.0, 40.0)), (Point::new(0.0, 40.0), Side::Left));
    }

    #[test]
    fn test_route_without_points_is_default() {
        let a = Rect::new(0.0, 0.0, 100.0, 50.0);
        let b = Rect::new(300.0, 0.0, 400.0, 50.0);
        assert_eq!(route(&conn(None), a, b), default_route(a, b));
        assert_eq!(route(&conn(Some(vec![])), a, b), default_route(a, b));
    }

    #[test]
    fn test_route_resnaps_ends_only() {
        let manual = vec![
            Point::new(100.0, 25.0),
            Point::new(200.0, 25.0),
            Point::new(200.0, 225.0),
            Point::new(300.0, 225.0),
        ];
        // `from` moved 20 to the right.
        let from = Rect::new(20.0, 0.0, 120.0, 50.0);
        let to = Rect::new(300.0, 200.0, 400.0, 250.0);
        let points = route(&conn(Some(manual.clone())), from, to);
        assert_eq!(points.len(), 4);
        assert_eq!(points[0], Point::new(120.0, 25.0));
        assert_eq!(&points[1..3], &manual[1..3]);
        assert_eq!(points[3], manual[3]);
    }

    #[test]
    fn test_route_slides_anchor_to_stay_orthogonal() {
        // A diagonal first segment, e.g. after concurrent waypoint edits.
        let manual = vec![Point::new(100.0, 25.0), Point::new(200.0, 40.0), Point::new(200.0, 225.0), Point::new(300.0, 225.0)];
        let from = Rect::new(0.0, 0.0, 100.0, 50.0);
        let to = Rect::new(300.0, 200.0, 400.0, 250.0);
        let points = route(&conn(Some(manual)), from, to);
        assert_eq!(points.len(), 4);
        assert_eq!(points[0], Point::new(100.0, 40.0));
        assert_eq!(points[3], Point::new(300.0, 225.0));
        assert_orthogonal(&points);
    }

    #[test]
    fn test_route_inserts_elbow_when_sliding_fails() {
        let manual = vec![Point::new(100.0, 25.0), Point::new(200.0, 25.0), Point::new(200.0, 225.0), Point::new(300.0, 225.0)];
        let from = Rect::new(0.0, 100.0, 100.0, 150.0);
        let to = Rect::new(300.0, 200.0, 400.0, 250.0);
        let points = route(&conn(Some(manual.clone())), from, to);
        assert_eq!(points.len(), 5);
        assert_orthogonal(&points);
        assert_eq!(&points[2..4], &manual[1..3]);
    }

    #[test]
    fn test_segment_handles_skip_diagonals() {
        let points = vec![Point::new(0.0, 0.0), Point::new(100.0, 0.0), Point::new(150.0, 80.0)];
        let handles = segment_handles(&points);
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].axis, SegmentAxis::Horizontal);
        assert_eq!(hit_test_segment_handle(&points, Point::new(51.0, 2.0), 4.0), Some(0));
        assert_eq!(hit_test_segment_handle(&points, Point::new(120.0, 40.0), 4.0), None);
    }

    #[test]
    fn test_drag_horizontal_segment_moves_in_y() {
        let points = vec![Point::new(0.0, 0.0), Point::new(0.0, 50.0), Point::new(100.0, 50.0), Point::new(100.0, 100.0)];
        let moved = drag_segment(&points, 1, Vec2::new(30.0, 20.0)).expect("Failed to drag segment");
        assert_eq!(moved[1], Point::new(0.0, 70.0));
        assert_eq!(moved[2], Point::new(100.0, 70.0));
        assert_eq!(moved[0], points[0]);
        assert_orthogonal(&moved);
    }

    #[test]
    fn test_drag_rejections() {
        let points = vec![Point::new(0.0, 0.0), Point::new(100.0, 0.0), Point::new(150.0, 80.0)];
        assert_eq!(drag_segment(&points, 0, Vec2::new(25.0, 0.0)), Err(RoutingError::CrossAxisDrag { index: 0 }));
        assert_eq!(drag_segment(&points, 1, Vec2::new(0.0, 10.0)), Err(RoutingError::NotAxisAligned { index: 1 }));
        assert_eq!(drag_segment(&points, 2, Vec2::new(0.0, 10.0)), Err(RoutingError::NoSuchSegment { index: 2 }));
    }

    #[test]
    fn test_drop_anchor() {
        let mut items = Vec::new();
        for (id, x) in [("a", 0.0), ("b", 300.0), ("c", 600.0)] {
            items.push(NewItem::new(ItemKind::Actor, x, 0.0, 100.0, 50.0).into_item(id.to_string()));
        }
        items.push(NewItem::new(ItemKind::ContextContainer, 0.0, 500.0, 400.0, 300.0).into_item("box".to_string()));
        let projection = Projection::from_parts(items, Vec::new(), Default::default());
        let manual = conn(Some(vec![Point::new(100.0, 25.0), Point::new(300.0, 25.0)]));

        match drop_anchor(&manual, AnchorEnd::To, Point::new(650.0, 25.0), &projection) {
            AnchorDrop::Retarget(c) => {
                assert_eq!(c.to, "c");
                assert_eq!(c.from, "a");
                assert!(c.points.is_none());
            }
            AnchorDrop::SnapBack => panic!("expected retarget"),
        }
        assert_eq!(drop_anchor(&manual, AnchorEnd::To, Point::new(250.0, 25.0), &projection), AnchorDrop::SnapBack);
        assert_eq!(drop_anchor(&manual, AnchorEnd::To, Point::new(50.0, 25.0), &projection), AnchorDrop::SnapBack);
        assert_eq!(drop_anchor(&manual, AnchorEnd::From, Point::new(50.0, 25.0), &projection), AnchorDrop::SnapBack);
        assert_eq!(drop_anchor(&manual, AnchorEnd::To, Point::new(100.0, 600.0), &projection), AnchorDrop::SnapBack);
    }

    #[test]
    fn test_live_routes_follow_positions() {
        let items = vec![
            NewItem::new(ItemKind::Actor, 0.0, 0.0, 100.0, 50.0).into_item("a".to_string()),
            NewItem::new(ItemKind::Actor, 300.0, 0.0, 100.0, 50.0).into_item("b".to_string()),
        ];
        let projection = Projection::from_parts(items, vec![conn(None)], Default::default());
        let positions: HashMap<ItemId, Point> = [("b".to_string(), Point::new(300.0, 200.0))].into_iter().collect();

        let routes = live_routes(&projection, &positions);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].1.last().copied(), Some(Point::new(300.0, 225.0)));
    }
}
