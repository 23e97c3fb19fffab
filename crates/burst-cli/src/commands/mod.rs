pub mod export;
pub mod resume;
pub mod state_manager;
pub mod suspend;
pub mod validate;
