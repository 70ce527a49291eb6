use clap::{Args, ArgAction};

/// Options every front end understands.
#[derive(Debug, Args)]
#[clap(next_help_heading = "Global Options")]
pub struct GlobalOpts {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides this.
    #[arg(long, short, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(long, short, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl GlobalOpts {
    /// The default log filter implied by the verbosity flags
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[clap(flatten)]
        global: GlobalOpts,
    }

    #[test]
    fn verbosity_counts_up() {
        let cli = Cli::parse_from(["test"]);
        assert_eq!(cli.global.log_level(), "warn");
        let cli = Cli::parse_from(["test", "-vv"]);
        assert_eq!(cli.global.log_level(), "trace");
        let cli = Cli::parse_from(["test", "--quiet"]);
        assert_eq!(cli.global.log_level(), "error");
    }
}
