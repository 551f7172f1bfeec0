//! Prompt command

use std::io::{self, Write};

use anyhow::Result;

use super::{RunnerArgs, Session};
use crate::engine::Runner;

/// Initialize the model, then run one prompt or an interactive loop
pub async fn run(args: RunnerArgs, prompt: Option<String>) -> Result<()> {
    let session = Session::open(args.load_config()?)?;
    let runner = session.require_runner()?;

    let plan = runner.plan()?;
    tracing::info!("Loading model: {}", plan.model);
    runner.init().await?;
    tracing::info!("Model ready");

    // If prompt provided, run once
    if let Some(prompt) = prompt {
        respond(runner, &prompt).await?;
        return Ok(());
    }

    // Interactive loop
    tracing::info!("Starting interactive session.");
    println!("Model: {} ({})", plan.model, plan.kind);
    println!("Type your prompt and press Enter. Type 'exit' or Ctrl+C to quit.\n");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        // A failed run leaves the runner Ready, so keep the session going
        if let Err(e) = respond(runner, input).await {
            eprintln!("Error during inference: {}", e);
        }
        println!();
    }

    runner.shutdown().await;
    Ok(())
}

async fn respond(runner: &Runner, prompt: &str) -> Result<()> {
    let start = std::time::Instant::now();
    let output = runner.run_inference(prompt).await?;
    let elapsed = start.elapsed();

    if output.is_empty() {
        println!("(no output)");
    } else {
        println!("{}", output);
    }

    tracing::info!(
        "Inference finished in {:.2}s ({} bytes out)",
        elapsed.as_secs_f64(),
        output.len()
    );
    Ok(())
}
