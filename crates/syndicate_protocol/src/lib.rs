//! # Syndicate Protocol
//!
//! Wire envelope and schema versioning for the Syndicate broker protocol.
//!
//! One JSON object is exchanged per entity transfer:
//! - [`EntityEnvelope`] carries identity, timestamps, translations and the
//!   handler-specific field values
//! - [`EmbeddedRef`] entries describe referenced entities, either as
//!   resolvable pointers or with a nested envelope inline
//! - [`schema_version`] hashes the field schema of an entity type so both
//!   sides can detect drift between configuration and payload

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod embed;
mod envelope;
mod error;
mod version;

pub use embed::{connection_id, AutoExport, EmbeddedRef};
pub use envelope::EntityEnvelope;
pub use error::{ProtocolError, ProtocolResult};
pub use version::schema_version;
