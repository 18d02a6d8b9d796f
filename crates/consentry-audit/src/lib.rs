//! Consentry Audit Emitter
//!
//! The write path for audit entries: redact sensitive metadata, emit a
//! tracing event, buffer, and flush batches to the durable store. Critical
//! entries (denials and revocations) skip the buffer and flush immediately;
//! everything else rides the periodic flush task.

pub mod emitter;
pub mod redaction;

pub use emitter::AuditEmitter;
pub use redaction::{RedactionPolicy, REDACTED};
