//! Test suite of the traffic synchronization project.
//!
//! `cargo run -- <test names>` runs the selected test cases; without names it
//! runs all of them.

mod intersection;
mod simulation;

use kern::TestReport;

fn grade(filter: &[String]) -> TestReport {
    kern::TestDriver::<()>::start(
        [
            // Right of way.
            &intersection::opposite_directions,
            &intersection::right_turn,
            &intersection::same_origin,
            &intersection::same_destination_conflict,
            &intersection::capacity,
            // Fairness.
            &intersection::passed_over_direction_first,
            &intersection::waiting_direction_is_not_starved,
            // Kernel entry points.
            &intersection::sync_init_cleanup,
            &intersection::cleanup_while_occupied,
            &intersection::cleanup_while_waiting,
            // Traffic.
            &simulation::smoke,
            &simulation::stress,
            &simulation::every_direction_served,
        ],
        filter,
    )
}

fn main() {
    kern::kprint::init();
    let filter = std::env::args().skip(1).collect::<Vec<_>>();
    if !grade(&filter).is_ok() {
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn grade() {
        kern::kprint::init();
        kern::kprint::set_quiet(true);
        assert!(super::grade(&[]).is_ok());
    }
}
