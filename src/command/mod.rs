//! Command sealing: canonical encoding, device-bound signatures and the
//! immutable envelope handed to the executor gateway.

pub mod canonical;
mod envelope;
mod sealer;
mod signer;

pub use envelope::{CommandEnvelope, CommandType, PolicyStamp, idempotency_key};
pub use sealer::CommandSealer;
pub use signer::DeviceSigner;
