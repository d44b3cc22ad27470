//! # Payload Layer
//!
//! A payload is one stored row: the CJSON body of the document plus typed
//! columns for every indexed field.
//!
//! - [`PayloadType`]: ordered field schema of a namespace. Field 0 is the
//!   reserved `-tuple` field holding the CJSON body; the remaining fields
//!   mirror the non-sparse index definitions. Fields are append-only;
//!   dropping one rebuilds every row.
//! - [`PayloadValue`]: refcounted row buffer with an LSN header. Readers
//!   share the handle; writers clone-on-write when the refcount is above
//!   one, so a query result can outlive slot reuse by later writers.

mod payload_type;
mod payload_value;

pub use payload_type::{PayloadFieldType, PayloadType, TUPLE_FIELD};
pub use payload_value::PayloadValue;
