pub mod input;
pub mod pointer;
