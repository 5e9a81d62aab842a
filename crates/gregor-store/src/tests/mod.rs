//! Engine conformance tests.
//!
//! Every scenario is written once, generically over [`StateMachine`], and
//! run against both the in-memory reference engine and the SQL engine. The
//! two must be observably identical.
//!
//! - `harness.rs`     - engine constructors, message builders, assertions
//! - `conformance.rs` - consume/state scenarios (creations, dismissals,
//!                      devices, historical snapshots, sync)
//! - `replay.rs`      - in-band message log queries and join fan-out merging


mod replay;
