pub mod api;
pub mod clock;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod settings;
pub mod wal;
