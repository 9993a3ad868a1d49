//! Stub challenger
//!
//! Implements the contract with no behavior at all: no index, no matches,
//! nothing to release. Useful as a floor for the scoreboard and for
//! checking that the harness tolerates a null search context.

use rankbench_abi::{Point, Rect, SearchContext};

/// Build nothing. Returning null is within the letter of the contract the
/// harness must survive.
///
/// # Safety
/// Never dereferences its arguments.
#[no_mangle]
pub unsafe extern "C" fn create(
    _points_begin: *const Point,
    _points_end: *const Point,
) -> *mut SearchContext {
    std::ptr::null_mut()
}

/// Find nothing.
///
/// # Safety
/// Never dereferences its arguments.
#[no_mangle]
pub unsafe extern "C" fn search(
    _ctx: *mut SearchContext,
    _rect: Rect,
    _count: i32,
    _out_points: *mut Point,
) -> i32 {
    0
}

/// Release nothing. Null means success.
///
/// # Safety
/// Never dereferences its argument.
#[no_mangle]
pub unsafe extern "C" fn destroy(_ctx: *mut SearchContext) -> *mut SearchContext {
    std::ptr::null_mut()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_entry_point_is_inert() {
        let rect = Rect {
            lx: 0.0,
            ly: 0.0,
            hx: 1.0,
            hy: 1.0,
        };

        unsafe {
            let ctx = create(std::ptr::null(), std::ptr::null());
            assert!(ctx.is_null());
            assert_eq!(search(ctx, rect, 16, std::ptr::null_mut()), 0);
            assert!(destroy(ctx).is_null());
        }
    }
}
