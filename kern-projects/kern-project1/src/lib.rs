//! # Project 1: Traffic Synchronization
//!
//! Four roads meet at a single intersection. Every vehicle is a kernel thread
//! that arrives from one [`Direction`] and leaves towards another, and the
//! intersection can hold only a handful of vehicles at once. Two vehicles
//! inside the intersection at the same time must never collide, and no
//! direction may be kept waiting forever while the others keep flowing.
//!
//! This project builds an **admission controller** for the intersection with
//! the blocking primitives of [`kern::sync`]. The controller is a passive
//! monitor: it never runs a thread of its own, and all of its work happens on
//! the vehicles' threads inside short critical sections.
//!
//! ## Getting Started
//!
//! To run the test suite, navigate to the `kern-project1/grader` directory and
//! run:
//!
//! ```bash
//! $ cargo run
//! ```
//!
//! ## Project Outline
//! - [`Intersection`]: The right-of-way rule and the admission controller.
//! - [`Simulation`]: A traffic generator that drives the controller end to end
//!   and independently checks every admission.
//!
//! [`Direction`]: intersection::Direction
//! [`Intersection`]: intersection
//! [`Simulation`]: simulation

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod intersection;
pub mod simulation;

pub use intersection::{
    Direction, INTERSECTION_CAPACITY, Intersection, Route, Ticket, intersection_after_exit,
    intersection_before_entry, intersection_sync_cleanup, intersection_sync_init,
};
