use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use passbook_core::{sha256_prefixed, AssetSource, Credentials, PassPipeline, PassbookConfig};
use tokio::io::AsyncWriteExt;

use super::read_fields;
use crate::cli::args::GenerateArgs;
use crate::exit_codes::SUCCESS;

pub async fn run(args: GenerateArgs) -> anyhow::Result<i32> {
    let config = resolve_config(&args).await?;

    let mut fields = read_fields(&args.fields).await?;
    if let Some(date) = args.relevant_date {
        fields.set_relevant_date(date);
    }

    let mut builder = PassPipeline::builder(args.style.as_str(), fields)
        .credentials(config.credentials.clone())
        .signer(Arc::new(config.signer()))
        .compression(config.compression());
    for (name, path) in args.images {
        builder = builder.image(name, AssetSource::path(path));
    }
    let pipeline = builder.build()?;

    if args.output == Path::new("-") {
        let mut stream = pipeline.run_streaming();
        let mut stdout = tokio::io::stdout();
        while let Some(chunk) = stream.next().await {
            stdout
                .write_all(&chunk?)
                .await
                .context("failed to write archive to stdout")?;
        }
        stdout.flush().await?;
    } else {
        let archive = pipeline.run_to_completion().await?;
        tokio::fs::write(&args.output, &archive)
            .await
            .with_context(|| format!("failed to write {}", args.output.display()))?;
        eprintln!(
            "wrote {} ({} bytes, {})",
            args.output.display(),
            archive.len(),
            sha256_prefixed(&archive)
        );
    }

    Ok(SUCCESS)
}

/// Defaults, then `--config`, then environment, then flags.
async fn resolve_config(args: &GenerateArgs) -> anyhow::Result<PassbookConfig> {
    let base = match &args.config {
        Some(path) => PassbookConfig::load(path).await?,
        None => PassbookConfig::default(),
    };
    let mut config = base.with_env_overrides()?.with_credentials(Credentials {
        signer_cert: args.signer_cert.clone(),
        ca_cert: args.ca_cert.clone(),
        passphrase: args.passphrase.clone(),
    });
    if let Some(program) = &args.openssl {
        config.openssl = program.clone();
    }
    if let Some(level) = args.compression {
        config.compression_level = level;
    }
    Ok(config)
}
