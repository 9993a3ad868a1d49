//! Challenger Benchmark Pipeline
//!
//! Drives one challenger through the fixed stage ladder
//!
//! ```text
//! Loaded → RuggednessChecked → PointsLoaded → Queried → Released
//! ```
//!
//! with a fault boundary around every rung. Only the query loop feeds the
//! ranked metric; points load is timed separately, and the memory probe's
//! end snapshot lands right before the context is released, so the reported
//! figure covers everything the challenger retained across load + query.

use crate::measure::HighResTimer;
use crate::memory::MemoryProbe;
use crate::module::Challenger;
use crate::workload::Workload;
use rankbench_abi::Point;
use rankbench_ipc::Phase;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Progress notification emitted as each stage completes.
#[derive(Debug, Clone, Copy)]
pub struct PhaseEvent {
    /// The stage that finished.
    pub phase: Phase,
    /// Wall clock spent in it, milliseconds.
    pub elapsed_ms: f64,
}

/// What a full pipeline run produced.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// A stage faulted. The challenger is ranked with the crash sentinel
    /// and no later stage was attempted — in particular the context is not
    /// released, since calling back into faulted code is off the table.
    Faulted {
        /// The stage that faulted.
        phase: Phase,
        /// Diagnostic for the run log.
        message: String,
    },
    /// Every stage ran.
    Completed {
        /// `create` time over the full point set (not ranked).
        load_ms: f64,
        /// The ranked metric: accumulated query-loop time.
        search_ms: f64,
        /// Whole megabytes retained across load + query.
        memory_mb: u64,
        /// Whether `destroy` returned null as the contract asks.
        destroy_clean: bool,
        /// Queries whose results broke the search contract.
        contract_violations: u32,
    },
}

const EMPTY_SLOT: Point = Point {
    id: 0,
    rank: 0,
    x: 0.0,
    y: 0.0,
};

/// Run `challenger` through every stage against `workload`.
///
/// `on_phase` fires after each completed stage so callers can stream the
/// run log (or forward IPC progress) while the pipeline is still going.
pub fn run_pipeline(
    challenger: &mut dyn Challenger,
    workload: &Workload,
    on_phase: &mut dyn FnMut(PhaseEvent),
) -> PipelineOutcome {
    let mut probe = MemoryProbe::new();
    probe.start();

    // Ruggedness: the documented empty-index edge case, probed before any
    // real data is committed. The output buffer is null with a zero cap,
    // the one shape the contract explicitly permits.
    let mut timer = HighResTimer::start_new();
    let rugged = catch_unwind(AssertUnwindSafe(|| {
        let ctx = challenger.create(&[]);
        if let Some(&rect) = workload.rects.first() {
            challenger.search(ctx, rect, 0, std::ptr::null_mut());
        }
        challenger.destroy(ctx);
    }));
    if let Err(panic) = rugged {
        return PipelineOutcome::Faulted {
            phase: Phase::Ruggedness,
            message: panic_message(panic),
        };
    }
    on_phase(PhaseEvent {
        phase: Phase::Ruggedness,
        elapsed_ms: timer.elapsed(),
    });

    // PointsLoaded: the full set, handed over as a read-only view the
    // module must copy from. Timed, but not part of the ranked metric.
    let mut load_timer = HighResTimer::start_new();
    let ctx = match catch_unwind(AssertUnwindSafe(|| challenger.create(&workload.points))) {
        Ok(ctx) => ctx,
        Err(panic) => {
            return PipelineOutcome::Faulted {
                phase: Phase::LoadPoints,
                message: panic_message(panic),
            };
        }
    };
    let load_ms = load_timer.elapsed();
    on_phase(PhaseEvent {
        phase: Phase::LoadPoints,
        elapsed_ms: load_ms,
    });

    // Queried: one contiguous slot of `result_count` points per query. The
    // module is only ever handed its own slot and the cap, so it cannot
    // overrun the run's storage.
    let result_count = workload.result_count as usize;
    let query_count = workload.rects.len();
    let mut results = vec![EMPTY_SLOT; query_count * result_count];
    let mut match_counts = vec![0i32; query_count];

    let mut query_timer = HighResTimer::new();
    let queried = catch_unwind(AssertUnwindSafe(|| {
        for (index, &rect) in workload.rects.iter().enumerate() {
            let out = if result_count == 0 {
                std::ptr::null_mut()
            } else {
                // In bounds by construction: index < query_count.
                unsafe { results.as_mut_ptr().add(index * result_count) }
            };
            query_timer.start();
            let matches = challenger.search(ctx, rect, workload.result_count as i32, out);
            query_timer.stop();
            match_counts[index] = matches;
        }
    }));
    if let Err(panic) = queried {
        return PipelineOutcome::Faulted {
            phase: Phase::Query,
            message: panic_message(panic),
        };
    }
    let search_ms = query_timer.elapsed();
    on_phase(PhaseEvent {
        phase: Phase::Query,
        elapsed_ms: search_ms,
    });

    // Outside the timed region: check what came back against the contract.
    let contract_violations = count_contract_violations(workload, &results, &match_counts);

    // Released. Snapshot memory first, so the reading reflects what the
    // challenger held while it was still useful.
    probe.stop();
    let mut release_timer = HighResTimer::start_new();
    let destroy_clean = match catch_unwind(AssertUnwindSafe(|| challenger.destroy(ctx))) {
        Ok(returned) => returned.is_null(),
        // A fault during release does not retract the recorded time.
        Err(_) => false,
    };
    on_phase(PhaseEvent {
        phase: Phase::Release,
        elapsed_ms: release_timer.elapsed(),
    });

    PipelineOutcome::Completed {
        load_ms,
        search_ms,
        memory_mb: probe.used_mb(),
        destroy_clean,
        contract_violations,
    }
}

/// Post-query contract check: match counts in range, results in ascending
/// rank order, every returned point inside its query rectangle. One
/// violation is counted per offending query.
fn count_contract_violations(workload: &Workload, results: &[Point], match_counts: &[i32]) -> u32 {
    let result_count = workload.result_count as usize;
    let mut violations = 0u32;

    for (index, &rect) in workload.rects.iter().enumerate() {
        let matches = match_counts[index];
        if matches < 0 || matches as usize > result_count {
            violations += 1;
            continue;
        }

        let slot = &results[index * result_count..index * result_count + matches as usize];
        let ordered = slot.windows(2).all(|pair| pair[0].rank <= pair[1].rank);
        let inside = slot.iter().all(|p| rect.contains(p.x, p.y));
        if !ordered || !inside {
            violations += 1;
        }
    }

    violations
}

/// Render a caught panic payload the way the standard hook would.
fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Challenger;
    use crate::workload::Seed;
    use rankbench_abi::{Rect, SearchContext};

    struct Index {
        points: Vec<Point>,
    }

    /// Honest baseline: copy, sort by rank, scan with early exit.
    struct WellBehaved;

    impl Challenger for WellBehaved {
        fn name(&self) -> &str {
            "well-behaved"
        }

        fn create(&mut self, points: &[Point]) -> *mut SearchContext {
            let mut copy = points.to_vec();
            copy.sort_unstable_by_key(|p| p.rank);
            Box::into_raw(Box::new(Index { points: copy })) as *mut SearchContext
        }

        fn search(
            &mut self,
            ctx: *mut SearchContext,
            rect: Rect,
            max_results: i32,
            out: *mut Point,
        ) -> i32 {
            if ctx.is_null() || max_results <= 0 || out.is_null() {
                return 0;
            }
            let index = unsafe { &*(ctx as *const Index) };
            let mut matches = 0i32;
            for p in &index.points {
                if rect.contains(p.x, p.y) {
                    unsafe { out.add(matches as usize).write(*p) };
                    matches += 1;
                    if matches >= max_results {
                        break;
                    }
                }
            }
            matches
        }

        fn destroy(&mut self, ctx: *mut SearchContext) -> *mut SearchContext {
            if !ctx.is_null() {
                drop(unsafe { Box::from_raw(ctx as *mut Index) });
            }
            std::ptr::null_mut()
        }
    }

    /// Faults partway through the query loop.
    struct PanicsOnQuery {
        calls: u32,
    }

    impl Challenger for PanicsOnQuery {
        fn name(&self) -> &str {
            "panics-on-query"
        }

        fn create(&mut self, points: &[Point]) -> *mut SearchContext {
            Box::into_raw(Box::new(Index {
                points: points.to_vec(),
            })) as *mut SearchContext
        }

        fn search(
            &mut self,
            _ctx: *mut SearchContext,
            _rect: Rect,
            _max_results: i32,
            _out: *mut Point,
        ) -> i32 {
            self.calls += 1;
            if self.calls > 2 {
                panic!("simulated challenger fault");
            }
            0
        }

        fn destroy(&mut self, ctx: *mut SearchContext) -> *mut SearchContext {
            if !ctx.is_null() {
                drop(unsafe { Box::from_raw(ctx as *mut Index) });
            }
            std::ptr::null_mut()
        }
    }

    /// Cannot even survive the empty-index smoke test.
    struct PanicsOnCreate;

    impl Challenger for PanicsOnCreate {
        fn name(&self) -> &str {
            "panics-on-create"
        }

        fn create(&mut self, _points: &[Point]) -> *mut SearchContext {
            panic!("create always fails");
        }

        fn search(
            &mut self,
            _ctx: *mut SearchContext,
            _rect: Rect,
            _max_results: i32,
            _out: *mut Point,
        ) -> i32 {
            0
        }

        fn destroy(&mut self, _ctx: *mut SearchContext) -> *mut SearchContext {
            std::ptr::null_mut()
        }
    }

    fn small_workload(result_count: u32) -> Workload {
        Workload::generate(200, 16, result_count, Seed([11, 22, 33, 44]))
    }

    #[test]
    fn well_behaved_challenger_completes() {
        let workload = small_workload(8);
        let mut events = Vec::new();
        let outcome = run_pipeline(&mut WellBehaved, &workload, &mut |e| events.push(e.phase));

        match outcome {
            PipelineOutcome::Completed {
                search_ms,
                destroy_clean,
                contract_violations,
                ..
            } => {
                assert!(search_ms >= 0.0);
                assert!(destroy_clean);
                assert_eq!(contract_violations, 0);
            }
            other => panic!("expected completion, got {other:?}"),
        }

        assert_eq!(
            events,
            vec![
                Phase::Ruggedness,
                Phase::LoadPoints,
                Phase::Query,
                Phase::Release
            ]
        );
    }

    #[test]
    fn zero_result_cap_completes_without_writes() {
        let workload = small_workload(0);
        let outcome = run_pipeline(&mut WellBehaved, &workload, &mut |_| {});
        match outcome {
            PipelineOutcome::Completed {
                contract_violations,
                ..
            } => assert_eq!(contract_violations, 0),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn query_fault_is_attributed_to_the_query_phase() {
        let workload = small_workload(4);
        let outcome = run_pipeline(&mut PanicsOnQuery { calls: 0 }, &workload, &mut |_| {});
        match outcome {
            PipelineOutcome::Faulted { phase, message } => {
                assert_eq!(phase, Phase::Query);
                assert!(message.contains("simulated challenger fault"));
            }
            other => panic!("expected a fault, got {other:?}"),
        }
    }

    #[test]
    fn ruggedness_fault_stops_the_ladder() {
        let workload = small_workload(4);
        let mut events = Vec::new();
        let outcome = run_pipeline(&mut PanicsOnCreate, &workload, &mut |e| events.push(e.phase));
        match outcome {
            PipelineOutcome::Faulted { phase, .. } => assert_eq!(phase, Phase::Ruggedness),
            other => panic!("expected a fault, got {other:?}"),
        }
        assert!(events.is_empty());
    }

    #[test]
    fn a_fault_does_not_poison_the_next_challenger() {
        let workload = small_workload(4);

        let first = run_pipeline(&mut PanicsOnQuery { calls: 0 }, &workload, &mut |_| {});
        assert!(matches!(first, PipelineOutcome::Faulted { .. }));

        let second = run_pipeline(&mut WellBehaved, &workload, &mut |_| {});
        assert!(matches!(second, PipelineOutcome::Completed { .. }));
    }

    #[test]
    fn violation_counter_flags_bad_counts_and_strays() {
        let workload = Workload::generate(0, 2, 2, Seed([1, 1, 1, 1]));

        // Query 0 claims more matches than the cap allows.
        // Query 1 returns a point outside every generated rectangle
        // (coordinates never leave ±50 000).
        let stray = Point {
            id: 0,
            rank: 5,
            x: 1.0e6,
            y: 1.0e6,
        };
        let results = vec![EMPTY_SLOT, EMPTY_SLOT, stray, EMPTY_SLOT];
        let counts = vec![3, 1];
        assert_eq!(count_contract_violations(&workload, &results, &counts), 2);
    }

    #[test]
    fn violation_counter_accepts_ordered_results() {
        let workload = Workload::generate(0, 1, 2, Seed([2, 2, 2, 2]));
        let rect = workload.rects[0];
        let inside = |rank| Point {
            id: 0,
            rank,
            x: rect.lx,
            y: rect.ly,
        };
        let results = vec![inside(1), inside(2)];
        assert_eq!(count_contract_violations(&workload, &results, &[2]), 0);
    }
}
