//! CAT Transport Library
//!
//! This crate owns the link to the physical rig:
//!
//! - [`Transport`]: the line-oriented `write` / `read_line` / `close` seam
//!   shared by the serial port and the simulator
//! - [`SerialTransport`]: a `tokio-serial` implementation
//! - [`autodetect`](autodetect::autodetect): baud-rate discovery with the `FA;` canary
//! - [`CatLink`]: the single-writer handle every task goes through
//!
//! # Example
//!
//! ```rust,no_run
//! use cat_transport::{autodetect, CatLink};
//!
//! # async fn example() -> Result<(), cat_transport::TransportError> {
//! let detected = autodetect::open("/dev/ttyUSB0", 9600).await?;
//! let link = CatLink::new(detected.transport);
//!
//! let freq = link.query("FA").await;
//! println!("VFO-A: {}", freq);
//! # Ok(())
//! # }
//! ```

pub mod autodetect;
pub mod error;
pub mod link;
pub mod ports;
pub mod serial;
pub mod transport;

pub use autodetect::{baud_ladder, Detected, PortOpener, SerialOpener, BAUD_RATES};
pub use error::TransportError;
pub use link::{CatLink, CatSession, DEFAULT_READ_TIMEOUT};
pub use ports::{list_ports, PortInfo};
pub use serial::SerialTransport;
pub use transport::Transport;
