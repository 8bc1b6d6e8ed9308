//! Data models for the LoveCakes backend.
//!
//! This module re-exports all model types used throughout the application.

pub mod procedure;

// Re-export commonly used types
pub use procedure::{
    CreateObjectResult, ExpectedReturn, InvocationResult, Params, ProcParam, ProcedureRequest,
    RecordSet, Row, validate_procedure_name,
};
