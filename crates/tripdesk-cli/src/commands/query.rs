//! Query command implementation.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use clap::Args;
use serde_json::Value;

use tripdesk_core::{ExecutorError, Operation};

use crate::output;
use crate::session::{Context, LogoutNotice};

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// File containing the GraphQL document, or `-` for stdin
    pub document: PathBuf,

    /// Variables as a JSON object
    #[arg(long)]
    pub vars: Option<String>,

    /// Operation name to execute
    #[arg(long)]
    pub operation_name: Option<String>,

    /// Send without a bearer token
    #[arg(long)]
    pub public: bool,
}

pub async fn run(ctx: &Context, args: QueryArgs) -> Result<()> {
    let operation = build_operation(&args)?;
    let executor = ctx.executor()?;
    let notice = LogoutNotice::spawn(&executor);

    let result = executor.execute(&operation).await;
    drop(executor);
    notice.finish().await;

    match result {
        Ok(data) => output::json(&data, true),
        Err(ExecutorError::GraphQl { data, errors }) => {
            for error in &errors {
                output::graphql_error(error);
            }
            if let Some(data) = data.filter(|d| !d.is_null()) {
                output::json(&data, true)?;
            }
            bail!("Query returned {} error(s)", errors.len())
        }
        Err(e) if e.is_unauthenticated() => {
            Err(e).context("Not signed in. Run `tripdesk login` first.")
        }
        Err(e) => Err(e).context("Query failed"),
    }
}

fn build_operation(args: &QueryArgs) -> Result<Operation> {
    let document = read_document(&args.document)?;
    let mut operation = Operation::new(document);

    if let Some(vars) = &args.vars {
        let variables: Value = serde_json::from_str(vars).context("Invalid --vars JSON")?;
        if !variables.is_object() {
            bail!("--vars must be a JSON object");
        }
        operation = operation.with_variables(variables);
    }
    if let Some(name) = &args.operation_name {
        operation = operation.with_operation_name(name);
    }
    if args.public {
        operation = operation.public();
    }

    Ok(operation)
}

fn read_document(path: &Path) -> Result<String> {
    let document = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read document from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    };

    if document.trim().is_empty() {
        bail!("GraphQL document is empty");
    }
    Ok(document)
}
