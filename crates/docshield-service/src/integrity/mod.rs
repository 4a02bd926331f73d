pub mod audit_loop;
pub mod hasher;
pub mod heuristics;
pub mod index;
pub mod monitor;
pub mod record;
