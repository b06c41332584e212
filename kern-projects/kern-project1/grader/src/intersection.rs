use grading::assert_exit_code;
use kern::{
    sync::{
        SpinLock,
        atomic::{AtomicBool, AtomicUsize},
    },
    thread::{JoinHandle, ThreadBuilder, ThreadState, get_state_by_tid},
};
use kern_project1::{
    Direction::{self, *},
    Intersection, Route, intersection_after_exit, intersection_before_entry,
    intersection_sync_cleanup, intersection_sync_init,
};
use std::sync::Arc;

/// Waits until `handle` either finishes or falls asleep. Returns true if it
/// fell asleep.
fn blocks(handle: &JoinHandle) -> bool {
    loop {
        if handle.is_finished() {
            return false;
        }
        if get_state_by_tid(handle.tid) == Ok(ThreadState::Parked) {
            return true;
        }
        std::thread::yield_now();
    }
}

/// A vehicle that crosses `intersection` and leaves right away.
fn vehicle<const C: usize>(
    intersection: &Arc<Intersection<C>>,
    origin: Direction,
    destination: Direction,
) -> JoinHandle {
    let intersection = intersection.clone();
    ThreadBuilder::new(format!("{origin}->{destination}")).spawn(move || {
        let ticket = intersection.request_entry(origin, destination);
        intersection.release(ticket);
    })
}

/// Admits `inside`, then checks whether a vehicle on `other` gets through
/// while `inside` is still there.
fn passes_next_to(inside: Route, other: Route) -> bool {
    let intersection = Arc::new(Intersection::<2>::new());
    let ticket = intersection.request_entry(inside.origin, inside.destination);
    let handle = vehicle(&intersection, other.origin, other.destination);
    let blocked = blocks(&handle);
    intersection.release(ticket);
    assert_eq!(handle.join(), 0);
    assert!(intersection.occupants().is_empty());
    !blocked
}

pub fn opposite_directions() {
    assert!(passes_next_to(Route::new(North, South), Route::new(South, North)));
    assert!(passes_next_to(Route::new(East, West), Route::new(West, East)));
}

pub fn right_turn() {
    // East to North turns right, and the vehicles leave to different sides.
    assert!(passes_next_to(Route::new(East, North), Route::new(West, South)));
    assert!(passes_next_to(Route::new(West, South), Route::new(East, North)));
    // A right turn into a destination that is already taken.
    assert!(!passes_next_to(Route::new(South, East), Route::new(West, East)));
}

pub fn same_origin() {
    assert!(passes_next_to(Route::new(North, South), Route::new(North, East)));
    assert!(passes_next_to(Route::new(West, East), Route::new(West, East)));
}

pub fn same_destination_conflict() {
    let intersection = Arc::new(Intersection::<2>::new());
    let ticket = intersection.request_entry(North, East);
    let handle = vehicle(&intersection, West, East);

    assert!(blocks(&handle), "West->East must wait for North->East");
    assert_eq!(intersection.waiting(), [0, 0, 0, 1]);
    assert_eq!(intersection.occupants(), [Route::new(North, East)]);

    intersection.release(ticket);
    assert_eq!(handle.join(), 0);
    assert_eq!(intersection.waiting(), [0; 4]);
    assert!(intersection.occupants().is_empty());
}

pub fn capacity() {
    let intersection = Arc::new(Intersection::<2>::new());
    let first = intersection.request_entry(North, South);
    let second = intersection.request_entry(North, East);

    // Compatible with both, but there is no room left.
    let handle = vehicle(&intersection, North, West);
    assert!(blocks(&handle));

    intersection.release(first);
    assert_eq!(handle.join(), 0);
    assert_eq!(intersection.occupants(), [Route::new(North, East)]);
    intersection.release(second);

    let single = Arc::new(Intersection::<1>::new());
    let ticket = single.request_entry(North, South);
    let handle = vehicle(&single, South, North);
    assert!(blocks(&handle), "a single-place intersection holds one vehicle");
    single.release(ticket);
    assert_eq!(handle.join(), 0);
}

pub fn passed_over_direction_first() {
    let intersection = Arc::new(Intersection::<1>::new());
    let order = Arc::new(SpinLock::new(Vec::new()));

    // A vehicle that stays inside until `go` is set.
    let spawn = |origin: Direction, destination: Direction, go: Arc<AtomicBool>| {
        let (intersection, order) = (intersection.clone(), order.clone());
        ThreadBuilder::new(format!("{origin}->{destination}")).spawn(move || {
            let ticket = intersection.request_entry(origin, destination);
            let mut order_guard = order.lock();
            order_guard.push(origin);
            order_guard.unlock();
            while !go.load() {
                std::thread::yield_now();
            }
            intersection.release(ticket);
        })
    };
    let admitted = || {
        let guard = order.lock();
        let admitted = Vec::clone(&guard);
        guard.unlock();
        admitted
    };

    let ticket = intersection.request_entry(North, South);
    let east_go = Arc::new(AtomicBool::new(false));
    let east = spawn(East, West, east_go.clone());
    assert!(blocks(&east));
    let south = spawn(South, North, Arc::new(AtomicBool::new(true)));
    assert!(blocks(&south));

    // Both waited equally long; the lower-numbered direction goes first and
    // South is passed over.
    intersection.release(ticket);
    while admitted().len() != 1 {
        std::thread::yield_now();
    }

    // A fresh arrival from the north must not overtake South.
    let north = spawn(North, South, Arc::new(AtomicBool::new(true)));
    assert!(blocks(&north));
    assert_eq!(intersection.waiting(), [1, 0, 1, 0]);
    east_go.store(true);

    for handle in [east, south, north] {
        assert_eq!(handle.join(), 0);
    }
    assert_eq!(admitted(), [East, South, North]);
}

pub fn waiting_direction_is_not_starved() {
    const ROUNDS: usize = 500;

    let intersection = Arc::new(Intersection::<2>::new());
    let releases = Arc::new(AtomicUsize::new(0));
    let go = Arc::new(AtomicBool::new(false));

    // Two streams of vehicles that are compatible with each other but not
    // with West->East. Each stream re-enters as soon as it has left.
    let stream = |origin: Direction, destination: Direction| {
        let (intersection, releases, go) = (intersection.clone(), releases.clone(), go.clone());
        let mut ticket = intersection.request_entry(origin, destination);
        ThreadBuilder::new(format!("{origin}->{destination} stream")).spawn(move || {
            while !go.load() {
                std::thread::yield_now();
            }
            for _ in 0..ROUNDS {
                releases.fetch_add(1);
                intersection.release(ticket);
                ticket = intersection.request_entry(origin, destination);
            }
            intersection.release(ticket);
        })
    };
    let north = stream(North, South);
    let south = stream(South, North);

    let west = {
        let (intersection, releases) = (intersection.clone(), releases.clone());
        ThreadBuilder::new("West->East").spawn(move || {
            let ticket = intersection.request_entry(West, East);
            let waited = releases.load();
            intersection.release(ticket);
            // Both vehicles inside leave, and at most one newcomer gets in
            // while West still ranks below it.
            if waited > 3 {
                kern::thread::Current::exit(waited as i32);
            }
        })
    };
    assert!(blocks(&west));
    go.store(true);

    assert_eq!(west.join(), 0, "West->East waited too long");
    assert_eq!(north.join(), 0);
    assert_eq!(south.join(), 0);
    assert!(intersection.occupants().is_empty());
    assert_eq!(intersection.waiting(), [0; 4]);
}

pub fn sync_init_cleanup() {
    for _ in 0..2 {
        intersection_sync_init();
        intersection_before_entry(North, South);
        intersection_before_entry(South, North);
        intersection_after_exit(North, South);
        intersection_after_exit(South, North);
        intersection_sync_cleanup();
    }
}

#[assert_exit_code(-1)]
fn cleanup_faults() {
    intersection_sync_cleanup();
}

pub fn cleanup_while_occupied() {
    intersection_sync_init();
    intersection_before_entry(East, West);
    // Cleaning up with a vehicle inside is a kernel bug, and leaves the
    // controller as it was.
    cleanup_faults();
    intersection_after_exit(East, West);
    intersection_sync_cleanup();
    // Cleaning up twice, too.
    cleanup_faults();
}

pub fn cleanup_while_waiting() {
    intersection_sync_init();
    intersection_before_entry(North, South);
    let waiter = ThreadBuilder::new("East->West").spawn(|| {
        intersection_before_entry(East, West);
        intersection_after_exit(East, West);
    });
    assert!(blocks(&waiter));
    // The waiting vehicle still uses the controller.
    cleanup_faults();
    intersection_after_exit(North, South);
    assert_eq!(waiter.join(), 0);
    intersection_sync_cleanup();
}
