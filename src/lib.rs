//! A durable, on-disk message spool for an MQTT-style publisher.
//!
//! The spool accepts outbound application messages, hands them to a
//! transport in priority/age order, tracks their in-flight lifecycle
//! (stored -> published -> confirmed / dropped), and reclaims space
//! through periodic maintenance. It is the store-and-forward buffer
//! between an application producer and an unreliable network link.
//!
//! The MQTT client, its session layer, and the underlying transport are
//! out of scope for this crate; they are expected to drive
//! [`Repository`] and [`Housekeeper`] from the outside.

pub mod backend;
pub mod config;
pub mod error;
pub mod housekeeper;
pub mod message;
pub mod repository;
mod schema;

pub use config::SpoolConfig;
pub use error::{Result, SpoolError};
pub use housekeeper::{Housekeeper, HousekeeperConfig};
pub use message::{Message, MessageBuilder, MessageState};
pub use repository::{RepairPolicy, Repository};
