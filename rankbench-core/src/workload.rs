//! Workload Generation
//!
//! The random point set and query rectangles every challenger is measured
//! against. Generation is driven by an explicit seeded generator threaded
//! through the call, so a run's workload is fully described by the four
//! seed words echoed in the banner — no process-global generator state.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rankbench_abi::{Point, Rect};
use std::fmt;

/// Coordinate spread. f32 keeps about six significant digits, so
/// coordinates scale a unit interval instead of spanning the integer range.
const COORD_SPREAD: f64 = 99997.7;

/// Four recorded 32-bit seed words, printed `%08X-%08X-%08X-%08X`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seed(pub [u32; 4]);

impl Seed {
    /// Draw a fresh seed from the OS entropy source.
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Expand the four words into the 32-byte key `StdRng` wants.
    fn key(&self) -> [u8; 32] {
        let mut key = [0u8; 32];
        for (chunk, word) in key.chunks_exact_mut(4).zip(self.0.iter().cycle()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        key
    }
}

impl fmt::Display for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08X}-{:08X}-{:08X}-{:08X}",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// The input every challenger is measured against. Immutable for the whole
/// run and shared read-only; challengers copy what they need at `create`.
#[derive(Debug, Clone)]
pub struct Workload {
    /// Top-k cap per query.
    pub result_count: u32,
    /// Seed the collections were generated from.
    pub seed: Seed,
    /// Generated points.
    pub points: Vec<Point>,
    /// Generated query rectangles, `lx <= hx` and `ly <= hy` guaranteed.
    pub rects: Vec<Rect>,
}

impl Workload {
    /// Generate `point_count` points and `query_count` rectangles from
    /// `seed`. Same seed, same workload, bit for bit.
    pub fn generate(point_count: u32, query_count: u32, result_count: u32, seed: Seed) -> Self {
        let mut rng = StdRng::from_seed(seed.key());

        let mut points = Vec::with_capacity(point_count as usize);
        for _ in 0..point_count {
            points.push(Point {
                id: rand_int(&mut rng) % 256,
                rank: rand_int(&mut rng),
                x: rand_coord(&mut rng),
                y: rand_coord(&mut rng),
            });
        }

        let mut rects = Vec::with_capacity(query_count as usize);
        for _ in 0..query_count {
            let (mut lx, mut hx) = (rand_coord(&mut rng), rand_coord(&mut rng));
            let (mut ly, mut hy) = (rand_coord(&mut rng), rand_coord(&mut rng));
            if hx < lx {
                std::mem::swap(&mut lx, &mut hx);
            }
            if hy < ly {
                std::mem::swap(&mut ly, &mut hy);
            }
            rects.push(Rect { lx, ly, hx, hy });
        }

        Self {
            result_count,
            seed,
            points,
            rects,
        }
    }
}

/// Uniform i32 over the middle half of the integer range.
fn rand_int(rng: &mut StdRng) -> i32 {
    rng.gen_range(i32::MIN / 2..=i32::MAX / 2)
}

/// Uniform f32 over roughly ±50 000.
fn rand_coord(rng: &mut StdRng) -> f32 {
    (rng.gen_range(-0.5f64..0.5) * COORD_SPREAD) as f32
}
