use passbook_core::{resolve_assets, validate_fields, PassStyle};

use super::read_fields;
use crate::cli::args::ValidateArgs;
use crate::exit_codes::SUCCESS;

/// Schema checks only: style, required fields, locations, barcode, image value types.
pub async fn run(args: ValidateArgs) -> anyhow::Result<i32> {
    let style: PassStyle = args.style.parse()?;
    let mut fields = read_fields(&args.fields).await?;

    fields.normalize_style(style)?;
    let assets = resolve_assets(&mut fields, Vec::new())?;
    validate_fields(&fields, style)?;

    println!(
        "{}: valid {} pass, {} image(s)",
        args.fields.display(),
        style,
        assets.len()
    );
    Ok(SUCCESS)
}
