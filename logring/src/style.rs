use protocol::Level;

/// Renders the prefix that tags each log line with its level. Styles are
/// plain function pointers so they can be swapped at runtime through
/// `Logger::set_level_style`.
pub type LevelStyle = fn(Level) -> &'static str;

/// A single upper-case character per level, e.g. `"E "`, `"W "`, `"I "`.
pub fn default_level_style(level: Level) -> &'static str {
    match level {
        Level::Fatal => "F ",
        Level::Error => "E ",
        Level::Warning => "W ",
        Level::Info => "I ",
        Level::Debug => "D ",
        Level::None => "",
    }
}

/// sd-daemon(3) compatible prefixes, e.g. `"<3>"` for errors.
pub fn systemd_level_style(level: Level) -> &'static str {
    match level {
        Level::Fatal => "<0>",
        Level::Error => "<3>",
        Level::Warning => "<4>",
        Level::Info => "<6>",
        Level::Debug => "<7>",
        Level::None => "",
    }
}
