pub mod actions;
pub mod commands;
pub mod dispatch;
pub mod globals;

pub mod start;
pub use self::start::start;
