//! Safely retires preemptible Kubernetes nodes by evicting their workloads before deletion.
//!
//! The [`drain`] module holds the drain engine, [`gateway`] is the only code that talks to the
//! Kubernetes API, and [`node`] exposes the node-retirement operations an external scheduling
//! loop consumes.
pub mod constants;
pub mod drain;
pub mod gateway;
pub mod node;
pub mod telemetry;
