//! Copy-on-write data model flowing through pipelines.
//!
//! # Main Types
//!
//! - [`DataObject`] - One node of a data tree (collection, container, buffer or attribute)
//! - [`DataRef`] - Counted handle; the count drives the copy-on-write decision
//! - [`DataBuffer`] - Numeric array payload

pub mod buffer;
pub mod object;

pub use buffer::DataBuffer;
pub use object::{AttributeValue, DataObject, DataPayload, DataRef, ObjectInfo};
