// Race telemetry pipeline - log parsing, track projection and live channels
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
