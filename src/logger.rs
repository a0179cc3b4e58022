//! Logging for an injected component: the host has no console of its own,
//! so output goes to a file in the temp directory, plus a terminal logger
//! for the case where the host *was* started from one.

use std::fs::File;

use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger,
    TerminalMode, WriteLogger,
};

const LOG_FILE: &str = "vdisplay_hook.log";

/// Initializes the process logger. Safe to call more than once; repeat
/// calls (an attach/detach/attach cycle) are no-ops.
pub fn init() {
    let config = ConfigBuilder::new()
        .set_thread_level(LevelFilter::Trace)
        .set_target_level(LevelFilter::Trace)
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        LevelFilter::Debug,
        config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    let path = std::env::temp_dir().join(LOG_FILE);
    match File::create(&path) {
        Ok(file) => loggers.push(WriteLogger::new(LevelFilter::Debug, config, file)),
        Err(_) => {
            // No writable temp dir; terminal-only is still better than
            // nothing.
        }
    }

    let _ = CombinedLogger::init(loggers);
}
