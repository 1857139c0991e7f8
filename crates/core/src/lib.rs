pub mod bot;
pub mod capture;
pub mod error;
pub mod logger;
pub mod pipeline;
pub mod platform;
pub mod settings;
pub mod sleep;
pub mod supervisor;
pub mod types;
pub mod vision;
