pub mod driver;
pub mod watch;
