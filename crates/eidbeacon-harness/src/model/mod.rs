//! Reference peers and operations for model-based testing.
//!
//! [`ModelPhone`] is an independent implementation of the peer side of EID
//! registration: it derives identity keys on its own and predicts the EIDs
//! the beacon should broadcast. [`Operation`]s are generated from arbitrary
//! bytes and applied to a [`SimBeacon`](crate::SimBeacon).

mod operation;
mod phone;

pub use operation::{Operation, OperationOutcome, SlotContent};
pub use phone::{ModelPhone, Registration};
