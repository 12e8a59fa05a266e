//! CLI entry point for dlmanager.

mod app;
mod app_config;
mod cli;

/// Process outcome, mapped to the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Every download finished (and saved, when asked).
    Success,
    /// Some downloads finished, some failed.
    Partial,
    /// Nothing finished, or the run was interrupted.
    Failure,
}

impl ProcessExit {
    fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Partial => 2,
        }
    }
}

#[tokio::main]
async fn main() {
    let code = match app::runtime::run().await {
        Ok(exit) => exit.code(),
        Err(error) => {
            eprintln!("Error: {error:#}");
            1
        }
    };
    // Exit directly: a pending stdin read in serve mode would otherwise keep
    // the runtime from shutting down.
    std::process::exit(code);
}
