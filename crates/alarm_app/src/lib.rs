pub mod app;
pub mod desktop;
