#[cfg(test)]
#[path = "../tests/unit/main_test.rs"]
mod main_test;

use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use gpt2_inference::{InferenceConfigBuilder, inspect_checkpoint, run_inference};
use log::{error, info};
use std::io::Write;

/// Define the generate subcommand.
fn generate_subcommand() -> Command {
    Command::new("generate")
        .about("Greedy generation from a prompt of token ids")
        .arg(
            Arg::new("checkpoint")
                .help("Model checkpoint file")
                .default_value("model.bin")
                .index(1),
        )
        .arg(
            Arg::new("vocabulary")
                .short('v')
                .long("vocabulary")
                .value_name("PATH")
                .help("Vocabulary file")
                .default_value("tokenizer.bin"),
        )
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_name("IDS")
                .help("Comma-separated prompt token ids [default: 50256]"),
        )
        .arg(
            Arg::new("steps")
                .short('n')
                .long("steps")
                .value_name("INT")
                .help("Maximum number of generated tokens")
                .default_value("30")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("eos")
                .short('e')
                .long("eos")
                .value_name("INT")
                .help("End-of-sequence token id")
                .default_value("50256")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("max-prompt")
                .long("max-prompt")
                .value_name("INT")
                .help("Maximum number of prompt tokens")
                .default_value("256")
                .value_parser(clap::value_parser!(usize)),
        )
}

/// Define the inspect subcommand.
fn inspect_subcommand() -> Command {
    Command::new("inspect").about("Print the configuration and weight layout of a checkpoint").arg(
        Arg::new("checkpoint")
            .help("Model checkpoint file")
            .default_value("model.bin")
            .index(1),
    )
}

/// Run the generate command, writing only the generated fragments to `sink`
fn run_generate_command(matches: &ArgMatches, sink: impl Write) -> Result<()> {
    let config = InferenceConfigBuilder::default()
        .checkpoint_path(matches.get_one::<String>("checkpoint"))
        .vocabulary_path(matches.get_one::<String>("vocabulary"))
        .prompt(matches.get_one::<String>("input"))
        .max_steps(matches.get_one::<usize>("steps").copied())
        .eos_token(matches.get_one::<usize>("eos").copied())
        .max_prompt_tokens(matches.get_one::<usize>("max-prompt").copied())
        .build()
        .map_err(|e| anyhow::anyhow!(e))?;

    let outcome = run_inference(config, sink).map_err(|e| anyhow::anyhow!("Inference failed: {e:#}"))?;

    info!("Generated tokens: {:?}", outcome.tokens);

    Ok(())
}

/// Run the inspect command with the provided arguments
fn run_inspect_command(matches: &ArgMatches) -> Result<()> {
    let checkpoint_path = matches
        .get_one::<String>("checkpoint")
        .ok_or_else(|| anyhow::anyhow!("No checkpoint given"))?;

    let (config, layout, actual) = inspect_checkpoint(checkpoint_path)?;

    info!("📁 Checkpoint: {checkpoint_path}");

    println!("{config:#?}");
    println!("Expected {} floats, found {}", layout.expected_len(), actual);

    if layout.expected_len() != actual {
        anyhow::bail!("Checkpoint size does not match its configuration");
    }

    println!("{:>10} {:>12}  name", "offset", "len");
    for slice in layout.slices() {
        println!("{:>10} {:>12}  {}", slice.offset, slice.len, slice.name);
    }

    Ok(())
}

fn execute_commands() -> Result<()> {
    // Initialize logger with clean format (no timestamp/module prefix)
    env_logger::Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();

    let matches = Command::new("gpt2")
        .about("GPT-2 CLI: greedy generation from flat f32 checkpoints")
        .subcommand(generate_subcommand())
        .subcommand(inspect_subcommand())
        .get_matches();

    match matches.subcommand() {
        Some(("generate", matches)) => run_generate_command(matches, std::io::stdout().lock()),
        Some(("inspect", matches)) => run_inspect_command(matches),
        _ => anyhow::bail!("No subcommand specified. Use -h to print help information."),
    }
}

fn main() {
    if let Err(e) = execute_commands() {
        error!("Error: {e:#}");
        std::process::exit(1);
    }
}
