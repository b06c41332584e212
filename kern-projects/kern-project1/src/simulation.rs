//! # Traffic simulation.
//!
//! [`run`] brackets the process-wide controller with
//! [`intersection_sync_init`] and [`intersection_sync_cleanup`], and spawns a
//! number of vehicle threads. Each thread drives a share of the vehicles
//! through the intersection one after another, on pseudo-random routes.
//!
//! The simulation does not trust the controller. Every admitted vehicle is
//! recorded by an independent checker that verifies the capacity and the
//! right-of-way rule against the vehicles it knows to be inside. A vehicle is
//! removed from the checker *before* it calls [`intersection_after_exit`], so
//! the checker never sees more vehicles than the controller admitted and every
//! violation it reports is real.

use crate::intersection::{
    Direction, INTERSECTION_CAPACITY, Route, intersection_after_exit, intersection_before_entry,
    intersection_sync_cleanup, intersection_sync_init,
};
use kern::{
    sync::{SpinLock, atomic::AtomicUsize},
    thread::ThreadBuilder,
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// Parameters of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Total number of vehicles.
    pub vehicles: usize,
    /// Number of vehicle threads. Vehicles are spread evenly over them.
    pub threads: usize,
    /// Time a vehicle spends inside the intersection.
    pub crossing_time: Duration,
    /// Pause between two vehicles of the same thread.
    pub arrival_gap: Duration,
    /// Seed of the route generator. Zero picks a fixed seed.
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            vehicles: 200,
            threads: 10,
            crossing_time: Duration::from_micros(200),
            arrival_gap: Duration::from_micros(100),
            seed: 0,
        }
    }
}

/// Outcome of a simulation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationReport {
    /// Vehicles that crossed.
    pub admitted: usize,
    /// Admissions that broke the capacity or the right-of-way rule.
    pub violations: usize,
    /// Longest time a vehicle waited for admission.
    pub max_wait: Duration,
    /// Crossings per origin, indexed by [`Direction::index`].
    pub per_direction: [usize; 4],
}

/// xorshift64 route generator.
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        // Zero is a fixed point of xorshift.
        Self(if seed == 0 { 0xDEAD_BEEF_CAFE_BABE } else { seed })
    }

    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    /// A random route that is not a U-turn.
    fn route(&mut self) -> Route {
        let r = self.next();
        let origin = Direction::ALL[(r % 4) as usize];
        // 1..=3 quarter turns away from the origin.
        let destination = Direction::ALL[(origin.index() + 1 + ((r >> 8) % 3) as usize) % 4];
        Route::new(origin, destination)
    }
}

/// Vehicles inside the intersection, as far as the simulation knows.
#[derive(Default)]
struct Checker {
    inside: SpinLock<Vec<Route>>,
    violations: AtomicUsize,
}

impl Checker {
    fn enter(&self, route: Route) {
        let mut inside = self.inside.lock();
        let ok = inside.len() < INTERSECTION_CAPACITY
            && inside.iter().all(|other| route.is_compatible_with(other));
        if !ok {
            log::error!("{route} admitted next to {:?}", *inside);
            self.violations.fetch_add(1);
        }
        inside.push(route);
        inside.unlock();
    }

    fn leave(&self, route: Route) {
        let mut inside = self.inside.lock();
        if let Some(pos) = inside.iter().position(|r| *r == route) {
            inside.swap_remove(pos);
        }
        inside.unlock();
    }
}

#[derive(Default)]
struct Totals {
    admitted: AtomicUsize,
    max_wait_ns: AtomicUsize,
    per_direction: [AtomicUsize; 4],
}

/// Run the simulation described by `config`.
///
/// # Panics
///
/// Panics if the process-wide intersection is already initialized, or if a
/// vehicle thread faults.
pub fn run(config: &SimulationConfig) -> SimulationReport {
    intersection_sync_init();

    let checker = Arc::new(Checker::default());
    let totals = Arc::new(Totals::default());
    let threads = config.threads.max(1);
    let mut seeder = Rng::new(config.seed);

    let handles = (0..threads)
        .map(|i| {
            let share = config.vehicles / threads + usize::from(i < config.vehicles % threads);
            let mut rng = Rng::new(seeder.next());
            let (checker, totals, config) = (checker.clone(), totals.clone(), config.clone());
            ThreadBuilder::new(format!("vehicle-{i}")).spawn(move || {
                for _ in 0..share {
                    let route = rng.route();
                    let arrival = Instant::now();
                    intersection_before_entry(route.origin, route.destination);
                    let waited = arrival.elapsed();

                    checker.enter(route);
                    std::thread::sleep(config.crossing_time);
                    checker.leave(route);
                    intersection_after_exit(route.origin, route.destination);

                    totals.admitted.fetch_add(1);
                    totals.per_direction[route.origin.index()].fetch_add(1);
                    totals
                        .max_wait_ns
                        .fetch_max(usize::try_from(waited.as_nanos()).unwrap_or(usize::MAX));
                    std::thread::sleep(config.arrival_gap);
                }
            })
        })
        .collect::<Vec<_>>();

    let faulted = handles.into_iter().map(|h| h.join()).filter(|&code| code != 0).count();
    if faulted != 0 {
        panic!("{faulted} vehicle thread(s) faulted");
    }
    intersection_sync_cleanup();

    let report = SimulationReport {
        admitted: totals.admitted.load(),
        violations: checker.violations.load(),
        max_wait: Duration::from_nanos(totals.max_wait_ns.load() as u64),
        per_direction: [0, 1, 2, 3].map(|i| totals.per_direction[i].load()),
    };
    log::info!(
        "simulation: {} vehicles admitted, {} violations, longest wait {:?}, per direction {:?}",
        report.admitted,
        report.violations,
        report.max_wait,
        report.per_direction
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_are_never_u_turns() {
        let mut rng = Rng::new(0);
        let mut seen = [[false; 4]; 4];
        for _ in 0..1000 {
            let route = rng.route();
            assert_ne!(route.origin, route.destination);
            seen[route.origin.index()][route.destination.index()] = true;
        }
        let covered = seen.iter().flatten().filter(|&&s| s).count();
        assert_eq!(covered, 12);
    }

    #[test]
    fn same_seed_same_traffic() {
        let (mut a, mut b) = (Rng::new(42), Rng::new(42));
        for _ in 0..32 {
            assert_eq!(a.route(), b.route());
        }
    }

    #[test]
    fn checker_flags_conflicts() {
        let checker = Checker::default();
        checker.enter(Route::new(Direction::North, Direction::East));
        checker.enter(Route::new(Direction::West, Direction::East));
        assert_eq!(checker.violations.load(), 1);
        checker.leave(Route::new(Direction::North, Direction::East));
        checker.leave(Route::new(Direction::West, Direction::East));
        checker.enter(Route::new(Direction::North, Direction::South));
        checker.enter(Route::new(Direction::South, Direction::North));
        assert_eq!(checker.violations.load(), 1);
    }
}
