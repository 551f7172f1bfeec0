//! List models command

use std::path::PathBuf;

use anyhow::Result;

use crate::config::VaporConfig;
use crate::model::ModelDescriptor;

/// List registry models, including any added by a configuration file
pub async fn list(config: Option<PathBuf>, verbose: bool) -> Result<()> {
    let config = match config {
        Some(path) => VaporConfig::from_path(path)?,
        None => VaporConfig::default(),
    };
    let registry = config.registry();

    if registry.is_empty() {
        println!("  No models registered.");
        return Ok(());
    }

    println!("Registered models:\n");
    for descriptor in registry.iter() {
        if verbose {
            print_model_details(descriptor);
        } else {
            println!("  {} ({})", descriptor.name, descriptor.library);
        }
    }

    Ok(())
}

fn print_model_details(descriptor: &ModelDescriptor) {
    println!("  {}", descriptor.name);
    println!("    Library: {}", descriptor.library);
    match descriptor.backend_kind() {
        Ok(kind) => println!("    Backend: {}", kind),
        Err(e) => println!("    Backend: unavailable ({})", e),
    }
    if let Some(path) = &descriptor.path {
        println!("    Path: {}", path);
    }
    if let Some(manifest) = &descriptor.manifest {
        println!("    Manifest: {}", manifest);
    }
    println!();
}
