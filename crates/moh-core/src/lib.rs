pub mod config;
pub mod error;
pub mod events;
pub mod oscillation;
pub mod pipeline;
pub mod series;
pub mod timestamp;
pub mod upload;
pub mod window;
