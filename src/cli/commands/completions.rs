use clap::{Args, CommandFactory};
use clap_complete::{generate, Shell};

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Write the completion script to stdout.
pub fn run(args: &CompletionsArgs) {
    let mut cmd = crate::cli::Cli::command();
    generate(args.shell, &mut cmd, "vinestore", &mut std::io::stdout());
}
