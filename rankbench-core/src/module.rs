//! Dynamic Challenger Loading
//!
//! Wraps a native module in the three-entry-point contract. All symbols are
//! resolved eagerly at load time, so every later call site can assume a
//! fully validated module; anything missing drops only that challenger.

use rankbench_abi::{
    CreateFn, DestroyFn, Point, Rect, SearchContext, SearchFn, SYM_CREATE, SYM_DESTROY, SYM_SEARCH,
};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure to bring a challenger module into the run.
///
/// Both variants are recovered locally: the offending challenger is dropped
/// and the run continues.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The module file is missing or not loadable as a dynamic library.
    #[error("failed to load {path}: {source}")]
    Open {
        /// Requested module path.
        path: PathBuf,
        /// Loader error.
        source: libloading::Error,
    },

    /// The module loaded but does not export a required entry point.
    #[error("not a valid challenger module (missing `{symbol}`): {source}")]
    MissingSymbol {
        /// Name of the missing entry point.
        symbol: &'static str,
        /// Loader error.
        source: libloading::Error,
    },
}

/// The seam the benchmark pipeline is written against.
///
/// Production challengers are [`ChallengerModule`]s bound over a dynamic
/// library; tests substitute in-process implementations to exercise the
/// pipeline without loading native code.
pub trait Challenger {
    /// Display identity (the path the module was requested as).
    fn name(&self) -> &str;

    /// Build an index over a read-only point set. The empty set crosses the
    /// boundary as a null pointer pair. May return null.
    fn create(&mut self, points: &[Point]) -> *mut SearchContext;

    /// Bounded range-rank query. Writes at most `max_results` points at
    /// `out` (which may be null when the cap is zero).
    fn search(
        &mut self,
        ctx: *mut SearchContext,
        rect: Rect,
        max_results: i32,
        out: *mut Point,
    ) -> i32;

    /// Release the context. Null on success, the original handle on failure.
    fn destroy(&mut self, ctx: *mut SearchContext) -> *mut SearchContext;
}

/// A challenger loaded from a dynamic library with all three entry points
/// bound up front.
pub struct ChallengerModule {
    name: String,
    create: CreateFn,
    search: SearchFn,
    destroy: DestroyFn,
    // The function pointers above are only valid while the library stays
    // mapped; field order keeps `_lib` dropping last.
    _lib: libloading::Library,
}

impl ChallengerModule {
    /// Load `path` and bind `create`/`search`/`destroy`.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let name = path.display().to_string();

        // SAFETY: loading runs the module's initializers; a challenger is
        // trusted native code by definition of the contract.
        let lib = unsafe { libloading::Library::new(path) }.map_err(|source| LoadError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        // SAFETY: the symbol types are exactly the exported signatures of
        // the challenger contract.
        let create = unsafe {
            *lib.get::<CreateFn>(SYM_CREATE)
                .map_err(|source| LoadError::MissingSymbol {
                    symbol: "create",
                    source,
                })?
        };
        let search = unsafe {
            *lib.get::<SearchFn>(SYM_SEARCH)
                .map_err(|source| LoadError::MissingSymbol {
                    symbol: "search",
                    source,
                })?
        };
        let destroy = unsafe {
            *lib.get::<DestroyFn>(SYM_DESTROY)
                .map_err(|source| LoadError::MissingSymbol {
                    symbol: "destroy",
                    source,
                })?
        };

        Ok(Self {
            name,
            create,
            search,
            destroy,
            _lib: lib,
        })
    }
}

impl Challenger for ChallengerModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&mut self, points: &[Point]) -> *mut SearchContext {
        let (begin, end) = if points.is_empty() {
            // The empty set crosses the boundary as a null pair; the
            // ruggedness check commits every module to accept it.
            (std::ptr::null(), std::ptr::null())
        } else {
            let begin = points.as_ptr();
            // SAFETY: one past the end of a live slice.
            (begin, unsafe { begin.add(points.len()) })
        };

        // SAFETY: the range outlives the call; the contract obliges the
        // module to copy anything it wants to retain.
        unsafe { (self.create)(begin, end) }
    }

    fn search(
        &mut self,
        ctx: *mut SearchContext,
        rect: Rect,
        max_results: i32,
        out: *mut Point,
    ) -> i32 {
        // SAFETY: `out` has capacity for `max_results` points (or is null
        // with a zero cap), and `ctx` came from this module's `create`.
        unsafe { (self.search)(ctx, rect, max_results, out) }
    }

    fn destroy(&mut self, ctx: *mut SearchContext) -> *mut SearchContext {
        // SAFETY: `ctx` came from this module's `create` and is never used
        // again after this call.
        unsafe { (self.destroy)(ctx) }
    }
}
