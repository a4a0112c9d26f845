pub mod config;
pub mod frame;
pub mod frame_gate;
pub mod playback;
pub mod prompt;
pub mod relay;
pub mod session;
pub mod turn;

pub use config::*;
pub use frame::*;
pub use frame_gate::*;
pub use playback::*;
pub use prompt::*;
pub use relay::*;
pub use session::*;
pub use turn::*;
