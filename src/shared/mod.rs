pub mod dns;
pub mod logs;
pub mod net;
