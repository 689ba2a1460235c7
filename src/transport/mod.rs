pub mod loopback;
pub mod traits;

pub use loopback::{Delivery, LoopbackBus, Published, Responder};
pub use traits::BusTransport;
