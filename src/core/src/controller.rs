pub mod controller_handler;
pub mod signals;

pub use controller_handler::Controller;
pub use signals::spawn_signal_handler;
