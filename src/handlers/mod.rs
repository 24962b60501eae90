pub mod health_handlers;
pub mod nosql_handlers;
pub mod object_handlers;
pub mod sql_handlers;
