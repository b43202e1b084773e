//! Plot grid engine: an unbounded 2D plane cut into fixed-size plots
//! separated by roads, with runtime merging of adjacent same-owner plots.
//!
//! Everything here is synchronous and I/O-free. Concurrency and persistence
//! live in `plotgrid-server`.

pub mod plot;
pub mod world;
