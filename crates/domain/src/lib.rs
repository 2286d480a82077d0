pub mod entities;
pub mod payload;
pub mod ports;
pub mod render_context;
pub mod repositories;
pub mod steps;
pub mod task;

pub use entities::*;
pub use payload::*;
pub use ports::*;
pub use render_context::{
    build_process_context, interpolate, needs_help, ProcessContextParams, VAR_PATTERN,
};
pub use repositories::*;
pub use steps::*;
pub use task::*;
