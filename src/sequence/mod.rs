pub mod validator;

pub use validator::{validate, LoopIndex};
