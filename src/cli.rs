use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

use converge::TargetKind;

#[derive(Parser)]
#[command(name = "cloudup")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Converge cloud infrastructure from a declarative run manifest", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Converge every task in the manifest against a target
    Apply(ApplyArgs),

    /// Discover and diff only; show what apply would change
    Plan(RunArgs),

    /// Print the dependency order of the manifest's tasks
    Graph(GraphArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Clone)]
pub struct RunArgs {
    /// Run manifest (TOML)
    #[arg(short = 'f', long, default_value = "cloudup.toml", env = "CLOUDUP_MANIFEST")]
    pub manifest: PathBuf,

    /// Simulated cloud state file
    #[arg(long, default_value = ".cloudup/state.json", env = "CLOUDUP_STATE")]
    pub state: PathBuf,

    /// Where changes are rendered
    #[arg(short, long, value_enum, default_value_t = TargetArg::Api)]
    pub target: TargetArg,

    /// Number of parallel workers (overrides the manifest)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Lifecycle override for one task, e.g. `private=exists-and-warns`
    #[arg(long = "lifecycle", value_name = "TASK=LIFECYCLE")]
    pub lifecycle: Vec<String>,
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Write Terraform/CloudFormation output here instead of stdout
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Terraform output syntax
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct GraphArgs {
    /// Run manifest (TOML)
    #[arg(short = 'f', long, default_value = "cloudup.toml", env = "CLOUDUP_MANIFEST")]
    pub manifest: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TargetArg {
    /// Mutate the (simulated) cloud directly
    Api,
    /// Emit Terraform configuration
    Terraform,
    /// Emit a CloudFormation template
    #[value(name = "cloudformation", alias = "cfn")]
    CloudFormation,
}

impl From<TargetArg> for TargetKind {
    fn from(arg: TargetArg) -> Self {
        match arg {
            TargetArg::Api => TargetKind::Api,
            TargetArg::Terraform => TargetKind::Terraform,
            TargetArg::CloudFormation => TargetKind::CloudFormation,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// `.tf.json`
    Json,
    /// Native HCL
    Hcl,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_flags() {
        let cli = Cli::parse_from([
            "cloudup",
            "apply",
            "--target",
            "cfn",
            "--lifecycle",
            "main=ignore",
            "-j",
            "8",
            "--yes",
        ]);
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(args.run.target, TargetArg::CloudFormation);
        assert_eq!(args.run.jobs, Some(8));
        assert_eq!(args.run.lifecycle, vec!["main=ignore"]);
        assert!(args.yes);
        assert_eq!(TargetKind::from(args.run.target), TargetKind::CloudFormation);
    }
}
