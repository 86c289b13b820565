// Application state shared by command handlers
use crate::application::file_parser::StreamingFileParser;
use crate::infrastructure::config::Settings;

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub parser: StreamingFileParser,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let parser = StreamingFileParser::new(settings.parser.clone());
        Self { settings, parser }
    }
}
