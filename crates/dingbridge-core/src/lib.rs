pub mod completion_types;
pub mod error;
pub mod text;
