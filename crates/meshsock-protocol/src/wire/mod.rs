//! Wire envelope and codec.

pub mod codec;
pub mod envelope;

pub use codec::{Frame, MessageCodec};
pub use envelope::{Envelope, EnvelopeType};
