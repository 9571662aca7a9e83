//! Per-component error/fault types for the BMS core.
//!
//! There is no single top-level `Error` enum: each component that can fail
//! defines its own sum type, matching the `STD_OK`/`STD_NOT_OK`,
//! `BAL_OK`/`BAL_*` and `BMS_OK`/`BMS_*` style error-code returns this was
//! grounded on one-for-one ([`BalRequestResult`], [`PackRequestResult`],
//! [`NvmReadError`], [`NvmWriteError`], [`ContactorFault`]). Cross-cutting
//! fault *reporting* (the part a top-level `Error` enum would otherwise
//! exist to unify) goes through the diagnostics bus's `EventId`/`Severity`
//! pair instead, which every subsystem already shares.

use core::fmt;

use crate::types::StringIndex;

// ---------------------------------------------------------------------------
// Contactor faults
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactorFault {
    FeedbackMismatch(StringIndex),
    ContactorInPositivePathOfString(StringIndex),
    ContactorInNegativePathOfString(StringIndex),
    PrechargeAbortedDueToVoltage(StringIndex),
    PrechargeAbortedDueToCurrent(StringIndex),
}

impl fmt::Display for ContactorFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FeedbackMismatch(s) => write!(f, "contactor feedback mismatch on string {}", s.get()),
            Self::ContactorInPositivePathOfString(s) => {
                write!(f, "contactor fault in positive path of string {}", s.get())
            }
            Self::ContactorInNegativePathOfString(s) => {
                write!(f, "contactor fault in negative path of string {}", s.get())
            }
            Self::PrechargeAbortedDueToVoltage(s) => {
                write!(f, "precharge aborted due to voltage on string {}", s.get())
            }
            Self::PrechargeAbortedDueToCurrent(s) => {
                write!(f, "precharge aborted due to current on string {}", s.get())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Persistent store result types (§4.B)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvmReadError {
    /// The stored payload's CRC did not match; caller receives a defaulted
    /// record and a diagnostics event is raised.
    CrcMismatch,
    /// The backing medium could not be accessed at all.
    BackendUnavailable,
}

impl fmt::Display for NvmReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CrcMismatch => write!(f, "CRC mismatch"),
            Self::BackendUnavailable => write!(f, "backend unavailable"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvmWriteError {
    /// A write to this record is already in flight; the caller's write was
    /// queued, not dropped — this variant is only returned if the queue
    /// itself is full.
    QueueFull,
    BackendUnavailable,
}

impl fmt::Display for NvmWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "write queue full"),
            Self::BackendUnavailable => write!(f, "backend unavailable"),
        }
    }
}

// ---------------------------------------------------------------------------
// Balancing engine request result (§4.G, maps BAL_OK/BAL_*)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalRequestResult {
    Ok,
    /// Request type is not honored from the current phase.
    IllegalRequest,
    /// A request of this kind is already pending/active (idempotent no-op).
    AlreadyInRequestedState,
}

// ---------------------------------------------------------------------------
// Pack orchestrator request result (§4.H, maps BMS_OK/BMS_*)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackRequestResult {
    Ok,
    IllegalRequest,
    AlreadyInRequestedState,
    /// The orchestrator is latched in `error` and only accepts a reset.
    ErrorLatched,
}
