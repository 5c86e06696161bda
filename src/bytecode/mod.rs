pub mod builder;
pub mod image;
pub mod inst;
pub mod label;
pub mod op_code;
pub mod program;
pub mod symbol;
