//! Certificate authority for TLS interception.
//!
//! Holds the root CA loaded at startup and mints a short-lived leaf for each
//! intercepted hostname.

mod ca;
mod error;
mod issuer;
mod serial;

pub use ca::{CA_COMMON_NAME, CaContext, CaMaterial, create_ca, generate_ca_material};
pub use error::CaError;
pub use issuer::{CLOCK_SKEW, IssuedLeaf, LEAF_VALIDITY, LeafIssuer};
pub use serial::{SERIAL_LEN, random_serial, serial_hex};
