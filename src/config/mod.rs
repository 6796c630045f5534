mod settings;

pub use settings::{Command, Config, MonitorSettings, NoteSettings, Settings};
