//! Trading engine control plane
//! Safety state machine, order lifecycle, and command routing

pub mod state;
pub mod order;
pub mod manager;
pub mod router;

pub use state::EngineState;
pub use order::{Order, OrderPolicy, OrderStatus};
pub use manager::OrderManager;
pub use router::{handle_command, RouterOutput};
