//! FT-991A Simulation Library
//!
//! This crate provides an in-memory stand-in for an FT-991A so the rig agent,
//! the relay and their tests can run without a transceiver attached:
//!
//! - **SimulatedRig**: a [`Transport`](cat_transport::Transport) that tracks
//!   frequency, mode, PTT and a small memory table and answers like the rig
//! - **SimJournal**: a shared record of every frame written to the rig
//! - **SimOpener**: a [`PortOpener`](cat_transport::PortOpener) that only
//!   answers at one baud rate, for exercising autodetection
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use cat_sim::SimulatedRig;
//! use cat_transport::Transport;
//!
//! # async fn example() {
//! let mut rig = SimulatedRig::new();
//! let journal = rig.journal();
//!
//! rig.write(b"FA00014250000;").await.unwrap();
//! rig.write(b"FA;").await.unwrap();
//! let reply = rig.read_line(Duration::from_millis(10)).await.unwrap();
//!
//! assert_eq!(reply, b"FA00014250000;");
//! assert!(journal.contains("FA00014250000;"));
//! # }
//! ```

pub mod journal;
pub mod opener;
pub mod rig;

pub use journal::SimJournal;
pub use opener::SimOpener;
pub use rig::{MemoryChannel, SimConfig, SimulatedRig};
