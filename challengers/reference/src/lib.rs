//! Reference challenger
//!
//! The baseline everyone has to beat: copy the points, sort them by rank
//! once at `create`, then answer every query with a linear scan that exits
//! as soon as the result buffer is full. Correct by construction and slow
//! on purpose.

use rankbench_abi::{Point, Rect, SearchContext};

struct RefIndex {
    /// All points, ascending rank.
    points: Vec<Point>,
}

/// Build the sorted copy.
///
/// The `[points_begin, points_end)` range follows the iterator convention
/// and is only valid for the duration of the call, so everything is copied
/// out before returning. A null pair is the empty set.
///
/// # Safety
/// `points_begin`/`points_end` must delimit a valid, possibly empty range
/// of initialized `Point`s, or both be null.
#[no_mangle]
pub unsafe extern "C" fn create(
    points_begin: *const Point,
    points_end: *const Point,
) -> *mut SearchContext {
    let count = if points_begin.is_null() || points_end.is_null() {
        0
    } else {
        // Byte distance, same as the classic implementations.
        (points_end as usize).saturating_sub(points_begin as usize) / std::mem::size_of::<Point>()
    };

    let mut points = if count == 0 {
        Vec::new()
    } else {
        std::slice::from_raw_parts(points_begin, count).to_vec()
    };
    // Unstable sort is deterministic for a given input; equal ranks keep a
    // fixed (if unspecified) order run over run.
    points.sort_unstable_by_key(|p| p.rank);

    Box::into_raw(Box::new(RefIndex { points })) as *mut SearchContext
}

/// Scan in ascending rank order, keeping matches until the cap is hit.
///
/// # Safety
/// `ctx` must be null or a handle returned by this module's `create`;
/// `out_points` must be null or have capacity for `count` points.
#[no_mangle]
pub unsafe extern "C" fn search(
    ctx: *mut SearchContext,
    rect: Rect,
    count: i32,
    out_points: *mut Point,
) -> i32 {
    if ctx.is_null() || count <= 0 || out_points.is_null() {
        return 0;
    }

    let index = &*(ctx as *const RefIndex);
    let mut matches = 0i32;
    for p in &index.points {
        if rect.contains(p.x, p.y) {
            out_points.add(matches as usize).write(*p);
            matches += 1;
            if matches >= count {
                break;
            }
        }
    }
    matches
}

/// Drop the sorted copy. Null means success.
///
/// # Safety
/// `ctx` must be null or a handle returned by this module's `create`, and
/// must not be used again afterwards.
#[no_mangle]
pub unsafe extern "C" fn destroy(ctx: *mut SearchContext) -> *mut SearchContext {
    if !ctx.is_null() {
        drop(Box::from_raw(ctx as *mut RefIndex));
    }
    std::ptr::null_mut()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(id: i32, rank: i32, x: f32, y: f32) -> Point {
        Point { id, rank, x, y }
    }

    const ZERO: Point = Point {
        id: 0,
        rank: 0,
        x: 0.0,
        y: 0.0,
    };

    unsafe fn create_over(points: &[Point]) -> *mut SearchContext {
        if points.is_empty() {
            create(std::ptr::null(), std::ptr::null())
        } else {
            create(points.as_ptr(), points.as_ptr().add(points.len()))
        }
    }

    #[test]
    fn top_two_by_rank_inside_rect() {
        // Ranks [3, 1, 4, 2], all inside (0,0)-(10,10): the top two are
        // ranks 1 and 2, in that order.
        let points = [
            pt(10, 3, 1.0, 1.0),
            pt(11, 1, 2.0, 2.0),
            pt(12, 4, 3.0, 3.0),
            pt(13, 2, 4.0, 4.0),
        ];
        let rect = Rect {
            lx: 0.0,
            ly: 0.0,
            hx: 10.0,
            hy: 10.0,
        };

        unsafe {
            let ctx = create_over(&points);
            let mut out = [ZERO; 2];
            let matches = search(ctx, rect, 2, out.as_mut_ptr());
            assert_eq!(matches, 2);
            assert_eq!(out[0].rank, 1);
            assert_eq!(out[1].rank, 2);
            assert!(destroy(ctx).is_null());
        }
    }

    #[test]
    fn zero_cap_returns_zero_and_writes_nothing() {
        let points = [pt(0, 1, 1.0, 1.0)];
        let rect = Rect {
            lx: 0.0,
            ly: 0.0,
            hx: 10.0,
            hy: 10.0,
        };

        unsafe {
            let ctx = create_over(&points);
            let matches = search(ctx, rect, 0, std::ptr::null_mut());
            assert_eq!(matches, 0);
            assert!(destroy(ctx).is_null());
        }
    }

    #[test]
    fn empty_index_answers_zero_without_fault() {
        let rect = Rect {
            lx: -5.0,
            ly: -5.0,
            hx: 5.0,
            hy: 5.0,
        };

        unsafe {
            let ctx = create_over(&[]);
            assert!(!ctx.is_null());
            let mut out = [ZERO; 4];
            let matches = search(ctx, rect, 4, out.as_mut_ptr());
            assert_eq!(matches, 0);
            assert!(destroy(ctx).is_null());
        }
    }

    #[test]
    fn only_points_inside_the_rect_are_returned() {
        let points = [
            pt(0, 1, -100.0, 0.0), // outside
            pt(1, 2, 1.0, 1.0),    // inside
            pt(2, 3, 0.0, 100.0),  // outside
            pt(3, 4, 2.0, 2.0),    // inside
        ];
        let rect = Rect {
            lx: 0.0,
            ly: 0.0,
            hx: 10.0,
            hy: 10.0,
        };

        unsafe {
            let ctx = create_over(&points);
            let mut out = [ZERO; 4];
            let matches = search(ctx, rect, 4, out.as_mut_ptr());
            assert_eq!(matches, 2);
            assert_eq!(out[0].rank, 2);
            assert_eq!(out[1].rank, 4);
            assert!(destroy(ctx).is_null());
        }
    }

    #[test]
    fn cap_truncates_to_lowest_ranks() {
        let points = [
            pt(0, 50, 1.0, 1.0),
            pt(1, 10, 1.0, 2.0),
            pt(2, 30, 2.0, 1.0),
            pt(3, 20, 2.0, 2.0),
        ];
        let rect = Rect {
            lx: 0.0,
            ly: 0.0,
            hx: 10.0,
            hy: 10.0,
        };

        unsafe {
            let ctx = create_over(&points);
            let mut out = [ZERO; 2];
            let matches = search(ctx, rect, 2, out.as_mut_ptr());
            assert_eq!(matches, 2);
            assert_eq!(out[0].rank, 10);
            assert_eq!(out[1].rank, 20);
            assert!(destroy(ctx).is_null());
        }
    }

    #[test]
    fn boundary_points_count_as_inside() {
        let points = [pt(0, 1, 0.0, 0.0), pt(1, 2, 10.0, 10.0)];
        let rect = Rect {
            lx: 0.0,
            ly: 0.0,
            hx: 10.0,
            hy: 10.0,
        };

        unsafe {
            let ctx = create_over(&points);
            let mut out = [ZERO; 2];
            assert_eq!(search(ctx, rect, 2, out.as_mut_ptr()), 2);
            assert!(destroy(ctx).is_null());
        }
    }
}
