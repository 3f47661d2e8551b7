use super::args::*;

pub mod generate;
pub mod validate;
pub mod verify;

use std::path::Path;

use anyhow::Context;
use passbook_core::FieldSet;

use crate::exit_codes::SUCCESS;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Generate(args) => generate::run(args).await,
        Command::Validate(args) => validate::run(args).await,
        Command::Verify(args) => verify::run(args).await,
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(SUCCESS)
        }
    }
}

pub(crate) async fn read_fields(path: &Path) -> anyhow::Result<FieldSet> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read fields from {}", path.display()))?;
    Ok(FieldSet::from_json_slice(&bytes)?)
}
