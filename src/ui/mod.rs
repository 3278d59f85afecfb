//! Terminal front end: the conversation widget and the loop that drives it

pub mod app;
pub mod conversation;

pub use app::run;
