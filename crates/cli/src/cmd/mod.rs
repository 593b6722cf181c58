pub mod replay;
pub mod sign;
