pub mod check;
pub mod listen;
pub mod watch;
