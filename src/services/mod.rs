pub mod document_store;
pub mod memory_backend;
pub mod object_backend;
pub mod object_store;
pub mod relational_store;
pub mod sql;
pub mod tabular;
