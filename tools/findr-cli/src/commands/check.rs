//! Show registered capabilities and the model runtime.

use super::builtin_registry;

pub fn run() -> anyhow::Result<()> {
    let registry = builtin_registry();

    println!("Findr Capability Check");
    println!("{}", "=".repeat(50));

    match registry.runtime() {
        Some(runtime) => println!("[OK] Model runtime: {runtime}"),
        None => println!("[WARN] Model runtime: none linked"),
    }
    println!("[OK] Capabilities registered: {}", registry.names().len());
    let config_path = findr_common::config::config_file_path();
    let found = if config_path.exists() { "" } else { " (not present, using defaults)" };
    println!("[OK] Config file: {}{found}", config_path.display());

    for manifest in registry.manifests() {
        println!();
        println!("  {} - {}", manifest.name, manifest.description);
        for output in manifest.produces {
            println!("     produces  {:<10} ({})", output.key, output.kind);
        }
        for input in manifest.requires {
            let optional = if input.required { "" } else { " (optional)" };
            println!("     requires  {}{optional}", input.key);
        }
        for key in manifest.config_keys {
            let required = if key.required { " (required)" } else { "" };
            println!("     config    {:<22} {}{required}", key.key, key.ty.name());
        }
    }

    println!();
    if registry.runtime().is_some() {
        println!("Pipelines can be initialized. Findr is ready.");
    } else {
        println!("Sessions will be admitted, but pipeline initialization will fail until a model runtime is linked.");
    }
    Ok(())
}
