//! Benchmark utilities for the Tessera engine.
//!
//! Microbenchmarks for the hot paths of the storage and scheduling layers:
//! spawning, archetype migration, and schedule builds/runs.
//!
//! # Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench -p tessera_bench
//!
//! # Run one group
//! cargo bench -p tessera_bench -- spawn
//! ```
//!
//! Results are written to `target/criterion/` with HTML reports.

pub mod components;
