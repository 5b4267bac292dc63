use std::cmp::Ordering;

use tracing::{debug, instrument};

use crate::error::{DeskewError, Result};
use crate::geometry::{OrderedCorners, Point, Quadrilateral};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quadrant {
    TopLeft,
    TopRight,
    BottomRight,
    BottomLeft,
}

impl Quadrant {
    fn index(self) -> usize {
        match self {
            Quadrant::TopLeft => 0,
            Quadrant::TopRight => 1,
            Quadrant::BottomRight => 2,
            Quadrant::BottomLeft => 3,
        }
    }
}

/// Quadrant of `p` relative to `centre`; `None` when it lies on either axis.
fn classify(p: Point, centre: Point) -> Option<Quadrant> {
    let dx = p.x - centre.x;
    let dy = p.y - centre.y;
    if dx == 0.0 || dy == 0.0 {
        return None;
    }
    Some(match (dx < 0.0, dy < 0.0) {
        (true, true) => Quadrant::TopLeft,
        (false, true) => Quadrant::TopRight,
        (false, false) => Quadrant::BottomRight,
        (true, false) => Quadrant::BottomLeft,
    })
}

/// Label the four corners top-left, top-right, bottom-right, bottom-left.
///
/// Each point is placed by the sign of its offset from the centroid. When
/// that does not give one point per quadrant (a point sits exactly on an
/// axis, or the card is rotated close to 45 degrees), the points are sorted
/// clockwise by angle around the centroid and the sequence starts at the
/// smallest `x + y`. Three or more points in one quadrant cannot be ordered.
///
/// The result depends only on the set of points, never on their input order.
#[instrument(level = "debug", skip_all)]
pub fn order_corners(quad: &Quadrilateral) -> Result<OrderedCorners> {
    let centre = quad.centroid();
    let points = quad.points();

    let mut slots: [Option<Point>; 4] = [None; 4];
    let mut counts = [0usize; 4];
    let mut on_axis = false;

    for &p in points {
        match classify(p, centre) {
            Some(q) => {
                counts[q.index()] += 1;
                slots[q.index()] = Some(p);
            }
            None => on_axis = true,
        }
    }

    if let Some(crowded) = counts.iter().position(|&c| c >= 3) {
        return Err(DeskewError::DegenerateQuadrilateral(format!(
            "{} corners fall in quadrant {crowded} around ({:.1}, {:.1})",
            counts[crowded], centre.x, centre.y
        )));
    }

    if !on_axis && counts.iter().all(|&c| c == 1) {
        if let [Some(tl), Some(tr), Some(br), Some(bl)] = slots {
            return Ok(OrderedCorners {
                top_left: tl,
                top_right: tr,
                bottom_right: br,
                bottom_left: bl,
            });
        }
    }

    debug!(?counts, on_axis, "quadrants ambiguous, ordering by angle");
    Ok(order_by_angle(points, centre))
}

fn order_by_angle(points: &[Point; 4], centre: Point) -> OrderedCorners {
    let mut sorted = *points;
    // atan2 with y pointing down increases clockwise on screen.
    sorted.sort_by(|a, b| {
        let angle_a = (a.y - centre.y).atan2(a.x - centre.x);
        let angle_b = (b.y - centre.y).atan2(b.x - centre.x);
        angle_a
            .total_cmp(&angle_b)
            .then_with(|| a.distance(&centre).total_cmp(&b.distance(&centre)))
            .then_with(|| a.x.total_cmp(&b.x))
            .then_with(|| a.y.total_cmp(&b.y))
    });

    let start = sorted
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| match (a.x + a.y).total_cmp(&(b.x + b.y)) {
            Ordering::Equal => a.y.total_cmp(&b.y),
            other => other,
        })
        .map(|(i, _)| i)
        .unwrap_or(0);
    sorted.rotate_left(start);

    OrderedCorners {
        top_left: sorted[0],
        top_right: sorted[1],
        bottom_right: sorted[2],
        bottom_left: sorted[3],
    }
}
