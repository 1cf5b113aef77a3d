pub mod bottleneck;
pub mod breakpoint;
pub mod dispatch;
pub mod entity;
pub mod event;
pub mod failure;
pub mod gen;
pub mod id;
pub mod logic;
pub mod movestrategy;
pub mod node;
pub mod port;
pub mod resource;
pub mod shift;
pub mod signal;
pub mod sim;
pub mod stats;
pub mod time;
pub mod variant;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

/// The single random number generator type used throughout a simulation.
pub type SimRng = rand_chacha::ChaCha8Rng;
