//! Discrete-event simulator of coalition formation among fog providers.
//!
//! Fog providers pool their fog nodes to serve latency-sensitive services
//! under time-varying load. At fixed simulated-time intervals the simulator
//! sizes every service with an M/M/c delay model, scores every coalition of
//! providers through a cost-minimizing VM placement solve, divides coalition
//! profits with the Shapley value and selects the Nash-stable coalition
//! structures. Per-provider profits are aggregated across independent
//! replications with confidence-interval based stopping.

pub mod coalition_formation;
pub mod combinatorics;
pub mod error;
pub mod events;
pub mod experiment;
pub mod float;
pub mod game;
pub mod mmc;
pub mod options;
pub mod output;
pub mod scenario;
pub mod simulation;
pub mod statistics;
pub mod vm_allocation;
pub mod vm_allocation_solver;
pub mod workload;
