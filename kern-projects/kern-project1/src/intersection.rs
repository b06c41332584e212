//! # Intersection admission control.
//!
//! The intersection is a single contested resource. A vehicle that wants to
//! cross first calls [`Intersection::request_entry`], which blocks until the
//! vehicle may safely enter, then drives through, and finally calls
//! [`Intersection::release`] with the [`Ticket`] it was handed.
//!
//! ## The right-of-way rule
//!
//! Two vehicles, described by their [`Route`]s, may be inside the intersection
//! at the same time if any of the following holds:
//!
//! - they entered from the same side, so they travel in parallel,
//! - they travel in exactly opposite directions, or
//! - one of them turns right and they leave towards different directions.
//!
//! Otherwise their paths cross and one of them must wait. A vehicle is
//! admitted when there is a free place in the intersection and its route is
//! compatible with every vehicle already inside.
//!
//! ## Fairness
//!
//! Admission is not FIFO. Every direction with waiting vehicles carries an
//! aging priority. Each admission resets the priority of the admitted
//! vehicle's direction and ages every other waiting direction by one. A
//! vehicle only enters if its direction outranks every other direction with
//! waiting vehicles, so once a direction holds the highest priority nobody
//! else gets in before it. A waiting direction therefore enters after at most
//! one admission per other direction plus the departure of the vehicles
//! inside.
//!
//! Whenever a vehicle enters or leaves, the controller wakes the vehicles of
//! the highest-ranked waiting direction. A woken vehicle is not guaranteed to
//! get in: the vehicles inside may still block it. It re-evaluates the rule
//! under the lock and goes back to sleep if it still cannot enter.
//!
//! ## Kernel entry points
//!
//! The kernel drives a single, process-wide controller through
//! [`intersection_sync_init`], [`intersection_before_entry`],
//! [`intersection_after_exit`] and [`intersection_sync_cleanup`].

use kern::sync::{ConditionVariable, Mutex, MutexGuard, SpinLock};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::sync::Arc;

/// A side of the intersection.
///
/// A vehicle arrives from its origin side and leaves through its destination
/// side. The discriminants index the per-direction bookkeeping.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Direction {
    /// North.
    North = 0,
    /// East.
    East = 1,
    /// South.
    South = 2,
    /// West.
    West = 3,
}

impl Direction {
    /// Every direction, in index order.
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    /// Index of this direction in per-direction tables.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The next direction, turning clockwise on the compass.
    pub const fn clockwise(self) -> Direction {
        Self::ALL[(self as usize + 1) % 4]
    }

    /// The next direction, turning counter-clockwise on the compass.
    pub const fn counter_clockwise(self) -> Direction {
        Self::ALL[(self as usize + 3) % 4]
    }

    /// The direction across the intersection.
    pub const fn opposite(self) -> Direction {
        Self::ALL[(self as usize + 2) % 4]
    }
}

impl core::fmt::Display for Direction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Direction::North => "North",
            Direction::East => "East",
            Direction::South => "South",
            Direction::West => "West",
        })
    }
}

/// The path of one vehicle through the intersection.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Route {
    /// Side the vehicle enters from.
    pub origin: Direction,
    /// Side the vehicle leaves through.
    pub destination: Direction,
}

impl Route {
    /// Create a new route.
    pub const fn new(origin: Direction, destination: Direction) -> Self {
        Self {
            origin,
            destination,
        }
    }

    /// Returns true if this route is a right turn.
    ///
    /// A vehicle coming from the north drives south, so its right hand points
    /// west: the destination is the counter-clockwise neighbour of the origin.
    pub fn is_right_turn(&self) -> bool {
        self.destination == self.origin.counter_clockwise()
    }

    /// Returns true if a vehicle on this route and a vehicle on `other` may be
    /// inside the intersection at the same time.
    ///
    /// The relation is symmetric.
    pub fn is_compatible_with(&self, other: &Route) -> bool {
        self.origin == other.origin
            || (self.origin == other.destination && self.destination == other.origin)
            || ((self.is_right_turn() || other.is_right_turn())
                && self.destination != other.destination)
    }
}

impl core::fmt::Display for Route {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}->{}", self.origin, self.destination)
    }
}

/// Proof of admission into an [`Intersection`].
///
/// A ticket names the place the vehicle occupies. It cannot be cloned, so a
/// place is released exactly once.
#[derive(Debug)]
#[must_use = "an admitted vehicle must release its ticket"]
pub struct Ticket {
    slot: usize,
    route: Route,
}

impl Ticket {
    /// The route this ticket was issued for.
    pub fn route(&self) -> Route {
        self.route
    }
}

struct State<const CAPACITY: usize> {
    occupants: [Option<Route>; CAPACITY],
    dir_wait: [usize; 4],
    dir_priority: [usize; 4],
}

impl<const CAPACITY: usize> State<CAPACITY> {
    /// A free place for `route`, if `route` is compatible with every occupant.
    fn vacancy_for(&self, route: &Route) -> Option<usize> {
        let mut vacancy = None;
        for (slot, occupant) in self.occupants.iter().enumerate() {
            match occupant {
                Some(other) if !route.is_compatible_with(other) => return None,
                Some(_) => (),
                None => {
                    vacancy.get_or_insert(slot);
                }
            }
        }
        vacancy
    }

    /// Returns true if `dir` goes before `other` when both have vehicles
    /// waiting: the higher priority wins, ties go to the lower-numbered
    /// direction.
    fn outranks(&self, dir: Direction, other: Direction) -> bool {
        let (p, q) = (self.dir_priority[dir.index()], self.dir_priority[other.index()]);
        p > q || (p == q && dir < other)
    }

    /// A place for `route`, if a vehicle on it may enter now.
    ///
    /// Besides a compatible vacancy, the vehicle's direction must outrank
    /// every other direction with waiting vehicles. Nobody cuts in front of a
    /// direction that has waited longer.
    fn admission_for(&self, route: &Route) -> Option<usize> {
        let yields = Direction::ALL.into_iter().any(|other| {
            other != route.origin
                && self.dir_wait[other.index()] > 0
                && !self.outranks(route.origin, other)
        });
        if yields { None } else { self.vacancy_for(route) }
    }

    /// Record the admission of a vehicle from `dir`.
    ///
    /// `dir` starts over, and every other direction with waiting vehicles ages
    /// by one.
    fn admit(&mut self, slot: usize, route: Route) {
        self.occupants[slot] = Some(route);
        for dir in Direction::ALL {
            if dir == route.origin {
                self.dir_priority[dir.index()] = 0;
            } else if self.dir_wait[dir.index()] > 0 {
                self.dir_priority[dir.index()] += 1;
            }
        }
    }

    /// The waiting direction to serve next.
    ///
    /// Ties go to the lowest-numbered direction.
    fn next_direction(&self) -> Option<Direction> {
        Direction::ALL
            .into_iter()
            .filter(|dir| self.dir_wait[dir.index()] > 0)
            .reduce(|best, dir| if self.outranks(dir, best) { dir } else { best })
    }
}

/// An admission controller for a 4-way intersection that holds at most
/// `CAPACITY` vehicles.
pub struct Intersection<const CAPACITY: usize = 2> {
    state: Mutex<State<CAPACITY>>,
    dir_cv: [ConditionVariable; 4],
}

impl<const CAPACITY: usize> Intersection<CAPACITY> {
    /// Create an empty intersection.
    pub const fn new() -> Self {
        const { assert!(CAPACITY > 0, "an intersection must hold a vehicle") };
        Self {
            state: Mutex::new(State {
                occupants: [None; CAPACITY],
                dir_wait: [0; 4],
                dir_priority: [0; 4],
            }),
            dir_cv: [const { ConditionVariable::new() }; 4],
        }
    }

    /// Block until a vehicle on `origin -> destination` may enter, then admit
    /// it.
    pub fn request_entry(&self, origin: Direction, destination: Direction) -> Ticket {
        let route = Route::new(origin, destination);
        let dir = origin.index();

        let mut state = self.state.lock();
        let mut waiting = false;
        let slot = loop {
            if let Some(slot) = state.admission_for(&route) {
                break slot;
            }
            if !waiting {
                state.dir_wait[dir] += 1;
                waiting = true;
                log::trace!("{route} waits");
            }
            state = self.dir_cv[dir].wait(state);
        };
        if waiting {
            state.dir_wait[dir] -= 1;
        }
        state.admit(slot, route);
        log::debug!("{route} enters (place {slot})");
        // The admission may have handed the right of way to another direction.
        self.wake_next(state);

        Ticket { slot, route }
    }

    /// Release the place held by `ticket` and wake the next direction.
    ///
    /// # Panics
    ///
    /// Panics if `ticket` was not issued by this intersection.
    pub fn release(&self, ticket: Ticket) {
        let mut state = self.state.lock();
        if state.occupants.get(ticket.slot) != Some(&Some(ticket.route)) {
            state.unlock();
            panic!("{} does not occupy place {}", ticket.route, ticket.slot);
        }
        state.occupants[ticket.slot] = None;
        log::debug!("{} leaves (place {})", ticket.route, ticket.slot);
        self.wake_next(state);
    }

    /// Release one vehicle on `origin -> destination` and wake the next
    /// direction.
    ///
    /// Vehicles on identical routes are interchangeable, so which of them is
    /// released does not matter.
    ///
    /// # Panics
    ///
    /// Panics if no vehicle on that route is inside.
    pub fn release_entry(&self, origin: Direction, destination: Direction) {
        let route = Route::new(origin, destination);
        let mut state = self.state.lock();
        let Some(slot) = state.occupants.iter().position(|o| *o == Some(route)) else {
            state.unlock();
            panic!("{route} is not inside the intersection");
        };
        state.occupants[slot] = None;
        log::debug!("{route} leaves");
        self.wake_next(state);
    }

    /// Wake the vehicles of the direction that has the right of way.
    fn wake_next(&self, state: MutexGuard<'_, State<CAPACITY>>) {
        match state.next_direction() {
            Some(next) => {
                log::trace!("wake {next} ({} waiting)", state.dir_wait[next.index()]);
                self.dir_cv[next.index()].broadcast(state);
            }
            None => state.unlock(),
        }
    }

    /// Routes of the vehicles inside right now.
    pub fn occupants(&self) -> Vec<Route> {
        let state = self.state.lock();
        let occupants = state.occupants.iter().flatten().copied().collect();
        state.unlock();
        occupants
    }

    /// Number of blocked vehicles per origin, indexed by [`Direction::index`].
    pub fn waiting(&self) -> [usize; 4] {
        let state = self.state.lock();
        let waiting = state.dir_wait;
        state.unlock();
        waiting
    }

    /// Checks that nobody uses the intersection.
    fn check_idle(&self) -> Result<(), &'static str> {
        let state = self.state.try_lock().map_err(|_| "its lock is held")?;
        let verdict = if state.occupants.iter().any(Option::is_some) {
            Err("vehicles are inside")
        } else if state.dir_wait.iter().any(|&n| n > 0) {
            Err("vehicles are waiting")
        } else {
            Ok(())
        };
        state.unlock();
        verdict
    }
}

impl<const CAPACITY: usize> Default for Intersection<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

/// The number of vehicles the process-wide intersection holds at once.
pub const INTERSECTION_CAPACITY: usize = 2;

static INTERSECTION: SpinLock<Option<Arc<Intersection<INTERSECTION_CAPACITY>>>> =
    SpinLock::new(None);

fn controller() -> Arc<Intersection<INTERSECTION_CAPACITY>> {
    let global = INTERSECTION.lock();
    let controller = Option::clone(&global);
    global.unlock();
    controller.unwrap_or_else(|| panic!("intersection is not initialized"))
}

/// Create the process-wide intersection controller.
///
/// # Panics
///
/// Panics if the controller already exists.
pub fn intersection_sync_init() {
    let mut global = INTERSECTION.lock();
    if global.is_some() {
        global.unlock();
        panic!("intersection is already initialized");
    }
    *global = Some(Arc::new(Intersection::new()));
    global.unlock();
    log::debug!("intersection initialized");
}

/// Destroy the process-wide intersection controller.
///
/// # Panics
///
/// Panics, leaving the controller in place, if a vehicle is inside or
/// waiting, if some thread still holds the controller, or if it was never
/// initialized.
pub fn intersection_sync_cleanup() {
    let mut global = INTERSECTION.lock();
    let verdict = match global.as_ref() {
        None => Err("it is not initialized"),
        Some(controller) if Arc::strong_count(controller) != 1 => Err("it is still in use"),
        Some(controller) => controller.check_idle(),
    };
    match verdict {
        Ok(()) => {
            let controller = global.take();
            global.unlock();
            drop(controller);
            log::debug!("intersection cleaned up");
        }
        Err(why) => {
            global.unlock();
            panic!("cannot clean up the intersection: {why}");
        }
    }
}

/// Called by a vehicle before it enters the intersection. Blocks until the
/// vehicle may enter.
pub fn intersection_before_entry(origin: Direction, destination: Direction) {
    let _ticket = controller().request_entry(origin, destination);
}

/// Called by a vehicle after it has left the intersection.
pub fn intersection_after_exit(origin: Direction, destination: Direction) {
    controller().release_entry(origin, destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use Direction::*;

    fn routes() -> impl Iterator<Item = Route> {
        Direction::ALL
            .into_iter()
            .flat_map(|o| Direction::ALL.into_iter().map(move |d| Route::new(o, d)))
    }

    #[test]
    fn right_turns() {
        let right = routes().filter(Route::is_right_turn).collect::<Vec<_>>();
        assert_eq!(
            right,
            [
                Route::new(North, West),
                Route::new(East, North),
                Route::new(South, East),
                Route::new(West, South),
            ]
        );
    }

    #[test]
    fn compass() {
        for d in Direction::ALL {
            assert_eq!(d.clockwise().counter_clockwise(), d);
            assert_eq!(d.opposite().opposite(), d);
            assert_eq!(Direction::try_from(u8::from(d)).ok(), Some(d));
        }
        assert_eq!(North.counter_clockwise(), West);
        assert!(Direction::try_from(4u8).is_err());
    }

    #[test]
    fn compatibility_is_symmetric() {
        for a in routes() {
            for b in routes() {
                assert_eq!(a.is_compatible_with(&b), b.is_compatible_with(&a), "{a} {b}");
            }
        }
    }

    #[test]
    fn right_of_way() {
        let ok = |a: Route, b: Route| a.is_compatible_with(&b);
        // Opposite directions.
        assert!(ok(Route::new(North, South), Route::new(South, North)));
        // A right turn and a vehicle leaving elsewhere.
        assert!(ok(Route::new(East, North), Route::new(West, South)));
        // Same origin.
        assert!(ok(Route::new(North, South), Route::new(North, East)));
        // Same destination, neither turns right.
        assert!(!ok(Route::new(North, East), Route::new(West, East)));
        // A right turn into an occupied destination.
        assert!(!ok(Route::new(South, East), Route::new(West, East)));
        // Crossing straight paths.
        assert!(!ok(Route::new(North, South), Route::new(East, West)));
    }

    #[test]
    fn admit_and_release() {
        let intersection = Intersection::<2>::new();
        let a = intersection.request_entry(North, South);
        let b = intersection.request_entry(South, North);
        assert_eq!(
            intersection.occupants(),
            [Route::new(North, South), Route::new(South, North)]
        );
        intersection.release(a);
        assert_eq!(intersection.occupants(), [Route::new(South, North)]);
        assert_eq!(b.route(), Route::new(South, North));
        intersection.release(b);
        assert!(intersection.occupants().is_empty());
        assert_eq!(intersection.waiting(), [0; 4]);
        assert_eq!(intersection.check_idle(), Ok(()));
    }

    #[test]
    fn identical_routes_release_by_value() {
        let intersection = Intersection::<2>::new();
        let _a = intersection.request_entry(West, East);
        let _b = intersection.request_entry(West, East);
        intersection.release_entry(West, East);
        assert_eq!(intersection.occupants(), [Route::new(West, East)]);
        intersection.release_entry(West, East);
        assert!(intersection.occupants().is_empty());
    }

    #[test]
    #[should_panic]
    fn release_of_absent_route() {
        Intersection::<2>::new().release_entry(North, South);
    }

    #[test]
    fn longest_passed_over_direction_goes_first() {
        let mut state = State::<2> {
            occupants: [None; 2],
            dir_wait: [1, 0, 3, 1],
            dir_priority: [2, 9, 0, 2],
        };
        // East has no waiters; North wins the tie with West.
        assert_eq!(state.next_direction(), Some(North));
        state.dir_priority[3] = 3;
        assert_eq!(state.next_direction(), Some(West));
        state.dir_wait = [0; 4];
        assert_eq!(state.next_direction(), None);
    }

    #[test]
    fn newcomers_yield_to_waiting_directions() {
        let mut state = State::<2> {
            occupants: [Some(Route::new(South, North)), None],
            dir_wait: [0, 0, 0, 1],
            dir_priority: [0; 4],
        };
        // West waits on South->North. North wins the tie and may still enter
        // next to South->North, but that ages West.
        assert_eq!(state.admission_for(&Route::new(North, South)), Some(1));
        state.admit(1, Route::new(North, South));
        assert_eq!(state.dir_priority, [0, 0, 0, 1]);

        // From now on West goes first, even for compatible newcomers.
        state.occupants[1] = None;
        assert_eq!(state.admission_for(&Route::new(North, South)), None);
        assert_eq!(state.admission_for(&Route::new(South, North)), None);
        assert_eq!(state.next_direction(), Some(West));

        // West itself is held back only by the vehicle inside.
        assert_eq!(state.admission_for(&Route::new(West, East)), None);
        state.occupants[0] = None;
        assert_eq!(state.admission_for(&Route::new(West, East)), Some(0));
    }

    #[test]
    fn admission_resets_the_admitted_direction() {
        let mut state = State::<2> {
            occupants: [None; 2],
            dir_wait: [2, 1, 0, 1],
            dir_priority: [4, 1, 0, 0],
        };
        state.dir_wait[0] -= 1;
        state.admit(0, Route::new(North, West));
        // East and West age, South has nobody waiting.
        assert_eq!(state.dir_priority, [0, 2, 0, 1]);
        assert_eq!(state.next_direction(), Some(East));
    }

    #[test]
    fn idle_check_reasons() {
        let intersection = Intersection::<2>::new();
        let guard = intersection.state.lock();
        assert_eq!(intersection.check_idle(), Err("its lock is held"));
        guard.unlock();

        let ticket = intersection.request_entry(East, West);
        assert_eq!(intersection.check_idle(), Err("vehicles are inside"));
        intersection.release(ticket);

        let mut state = intersection.state.lock();
        state.dir_wait[2] = 1;
        state.unlock();
        assert_eq!(intersection.check_idle(), Err("vehicles are waiting"));
    }
}
