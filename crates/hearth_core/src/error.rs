//! # Engine Error Types
//!
//! All errors that can surface from the frame scheduler.
//!
//! None of these terminate the engine. Mutation errors mean a request was
//! dropped (and logged); `SystemFaults` and `BarrierTimeout` are returned
//! from the frame that observed them so the caller decides what to do.

use std::fmt;

use thiserror::Error;

use crate::ecs::EntityId;

/// Errors that can occur in the frame scheduler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The entity already has an addition waiting for the next frame.
    #[error("entity {0} already has a pending addition")]
    DuplicateRequest(EntityId),

    /// The scene root cannot be deleted.
    #[error("entity {0} is the scene root and cannot be deleted")]
    ProtectedRoot(EntityId),

    /// The parent of a pending addition was never found in the tree.
    #[error("cannot attach entity {entity}: parent {parent} was not found")]
    OrphanedAddition {
        /// Entity that was waiting to be attached.
        entity: EntityId,
        /// Parent it targeted.
        parent: EntityId,
    },

    /// A deletion targeted an entity that is not in the tree.
    #[error("cannot delete entity {0}: not found in the scene")]
    OrphanedDeletion(EntityId),

    /// A removed code path was invoked.
    #[error("deprecated call: {0}")]
    DeprecatedCall(&'static str),

    /// One or more systems failed during a frame.
    #[error("{} system(s) failed during frame {frame}: {}", .faults.len(), FaultList(.faults))]
    SystemFaults {
        /// Frame that reported the failures. Faults left over from a frame
        /// that timed out at the barrier are reported here too; each
        /// [`SystemFault::frame`] names the frame it happened in.
        frame: u64,
        /// Every failure reported by that frame.
        faults: Vec<SystemFault>,
    },

    /// Concurrent systems did not report completion in time.
    #[error("timed out after {waited_ms}ms waiting for {pending} concurrent system(s)")]
    BarrierTimeout {
        /// Systems that had not finished.
        pending: usize,
        /// How long the scheduler waited.
        waited_ms: u64,
    },

    /// A system thread could not be started.
    #[error("failed to spawn thread for system `{system}`: {reason}")]
    ThreadSpawn {
        /// System that needed the thread.
        system: String,
        /// OS error text.
        reason: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Error returned by [`System::update`](crate::system::System::update).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct SystemError(String);

impl SystemError {
    /// Creates a system error with a human-readable reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    /// Returns the reason text.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.0
    }
}

/// A single system failure observed during a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemFault {
    /// Name of the failing system.
    pub system: String,
    /// Frame in which it failed.
    pub frame: u64,
    /// Error text or panic payload.
    pub reason: String,
    /// Whether the failure was a panic rather than a returned error.
    pub panicked: bool,
}

impl fmt::Display for SystemFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.panicked { "panicked" } else { "failed" };
        write!(f, "`{}` {kind}: {}", self.system, self.reason)
    }
}

struct FaultList<'a>(&'a [SystemFault]);

impl fmt::Display for FaultList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, fault) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{fault}")?;
        }
        Ok(())
    }
}
