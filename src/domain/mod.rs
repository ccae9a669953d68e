// Domain layer: core models and ports (interfaces). The concrete implementations live under src/adapters.

pub mod model;
pub mod ports;
