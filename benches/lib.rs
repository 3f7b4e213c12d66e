//! Pyface Benchmarks
//!
//! Performance benchmarks for the bridge's encode, decode and evaluation
//! paths, run against the scripted runtime.
//! Run with: cargo bench -p pyface-benchmarks

// This file exists only to satisfy Cargo's requirement for a lib target.
// The actual benchmarks are in benches/.
