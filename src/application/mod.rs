// Application layer - Parsing, projection and channel management
pub mod file_parser;
pub mod frame_codec;
pub mod geo_projector;
pub mod link_manager;
pub mod socket;
