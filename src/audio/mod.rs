pub mod player;
pub mod queue;
pub mod transport;
pub mod voice;
