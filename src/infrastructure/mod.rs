// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod svg_renderer;
pub mod ws_connector;
