//! Optional tools that hook into an [`App`](crate::App): hit counting,
//! input validation and scope-based authorization.

pub mod counter;
pub mod protector;
pub mod validator;
