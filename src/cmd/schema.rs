//! The `schema` subcommand.

use clap::{Args, ValueEnum};
use schemars::schema_for;
use tokio::io::AsyncWriteExt as _;

use crate::{
    analysis::AnalysisRecord,
    async_utils::io::create_writer,
    prelude::*,
    report::{DocumentRecord, PageRecord},
};

/// The different output records we can describe.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SchemaType {
    /// Per-page output.
    Page,
    /// Per-document output.
    Document,
    /// Output of `analyze`.
    Analysis,
}

/// Schema command line arguments.
#[derive(Debug, Args)]
pub struct SchemaOpts {
    /// The schema type to generate.
    #[clap(value_enum, value_name = "TYPE")]
    pub schema_type: SchemaType,

    /// The output path to write the schema to.
    #[clap(short = 'o', long = "output")]
    pub output_path: Option<PathBuf>,
}

/// The `schema` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_schema(schema_opts: &SchemaOpts) -> Result<()> {
    let schema = match schema_opts.schema_type {
        SchemaType::Page => schema_for!(PageRecord),
        SchemaType::Document => schema_for!(DocumentRecord),
        SchemaType::Analysis => schema_for!(AnalysisRecord),
    };

    let mut wtr = create_writer(schema_opts.output_path.as_deref()).await?;
    let mut schema_str =
        serde_json::to_string_pretty(&schema).context("failed to serialize schema")?;
    schema_str.push('\n');
    wtr.write_all(schema_str.as_bytes())
        .await
        .context("failed to write schema")?;
    wtr.flush().await.context("failed to flush schema")?;
    Ok(())
}
