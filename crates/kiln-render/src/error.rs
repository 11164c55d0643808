//! Protocol errors for the batching layer.

use crate::batch::BatchCapabilities;
use thiserror::Error;

/// Misuse of the batch session or state-stack protocol.
///
/// These are recoverable caller mistakes, reported instead of panicking so a
/// frame can survive a bad draw call. GPU-level failures are not represented
/// here; the device layer treats those as fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// `begin` was called while a session was already open.
    #[error("batch session is already open")]
    SessionAlreadyOpen,

    /// A geometry, push/pop or query call arrived outside begin/end.
    #[error("batch session is not open")]
    SessionNotOpen,

    /// A pop arrived on a state dimension with an empty override stack.
    #[error("pop on `{dimension}` without a matching push")]
    PopUnderflow { dimension: &'static str },

    /// An operation needs a capability the batch was built without.
    #[error("operation requires the {0:?} capability")]
    MissingCapability(BatchCapabilities),
}
