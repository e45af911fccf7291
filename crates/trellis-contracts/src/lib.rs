//! Trellis Contracts
//!
//! Stateless validation of data contracts between agent nodes. A contract
//! declares the expected interface at a node boundary: a JSON Schema, a
//! set of required fields, per-field type names, and per-field value
//! constraints. Each configured check runs independently and each failed
//! check yields one [`ContractViolation`].
//!
//! Violations are findings, never errors: the validator does not return
//! `Err` across its API, and an empty violation list means the data
//! passed. JSON Schema checking is a capability seam ([`SchemaValidator`]);
//! a validator constructed without it reports a warning-severity violation
//! for schema'd contracts instead of failing the run.

mod schema;
mod validator;
mod violation;

pub use schema::{JsonSchemaValidator, SchemaValidator};
pub use validator::ContractValidator;
pub use violation::{CheckKind, ContractViolation};
