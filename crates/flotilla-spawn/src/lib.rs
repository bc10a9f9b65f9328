//! Process spawner — materializes agents in panes.

pub mod spawner;
pub mod stop;

pub use spawner::{SpawnHandle, Spawner, SpawnerConfig, TransportConfig};
pub use stop::StopSignaller;
