use clap::Parser;

use catalog_etl::utils::{logger, validation::Validate};
use catalog_etl::{Action, Cli, EtlConfig, EtlPipeline, RunSummary};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logger::init_cli_logger(cli.verbose);

    tracing::info!("Starting catalog-etl");
    if cli.verbose {
        tracing::debug!("CLI args: {:?}", cli);
    }

    let config = match EtlConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ Failed to load config from {}: {}", cli.config.display(), e);
            eprintln!("❌ Failed to load config from {}: {}", cli.config.display(), e);
            std::process::exit(1);
        }
    };

    if cli.action != Action::Health {
        if let Err(e) = config.validate() {
            tracing::error!("❌ Configuration validation failed: {}", e);
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    }

    let data_types = match cli.parsed_data_types() {
        Ok(data_types) => data_types,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    let pipeline = EtlPipeline::new(config);

    let exit_code = match cli.action {
        Action::Health => {
            let report = pipeline.health_check().await;
            println!("Health check results:");
            for (component, healthy) in &report.components {
                println!("  {}: {}", component, if *healthy { "OK" } else { "FAILED" });
            }
            println!("  overall: {}", if report.overall { "OK" } else { "FAILED" });
            i32::from(!report.overall)
        }
        Action::Test => {
            let summary = tokio::select! {
                summary = pipeline.test_pipeline() => summary,
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("Pipeline interrupted by user");
                    std::process::exit(130);
                }
            };
            report_summary("Test pipeline", &summary)
        }
        Action::Full => {
            let summary = tokio::select! {
                summary = pipeline.run_full_pipeline(&data_types, cli.max_records) => summary,
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("Pipeline interrupted by user");
                    std::process::exit(130);
                }
            };
            report_summary("Full pipeline", &summary)
        }
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn report_summary(label: &str, summary: &RunSummary) -> i32 {
    if summary.success {
        println!("✅ {} completed successfully", label);
    } else {
        println!("❌ {} failed", label);
    }
    println!("  duration: {:.2}s", summary.duration_seconds);
    println!("  extracted: {}", summary.extracted);
    println!("  transformed: {}", summary.transformed);
    println!("  loaded: {}", summary.loaded);
    if !summary.errors.is_empty() {
        tracing::warn!("Run finished with {} errors", summary.errors.len());
        for error in &summary.errors {
            tracing::warn!("  {}", error);
        }
        println!("  errors: {}", summary.errors.len());
    }
    i32::from(!summary.success)
}
