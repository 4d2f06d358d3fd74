use anyhow::{Context, Result};
use curator_engine::{EngineSettings, SessionContext};
use curator_types::DirectiveRequest;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Execute the `session` command.
///
/// Each stdin line is a JSON directive request; blank fields are filled from
/// the previous request. One JSON report is printed per line.
pub async fn execute(settings: &EngineSettings, prefer_table: Option<String>) -> Result<()> {
    let executor = super::build_executor(settings)?;
    let mut session = SessionContext::new();
    if let Some(table) = prefer_table {
        session.prefer_table(table);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let request: DirectiveRequest = serde_json::from_str(&line)
            .with_context(|| format!("Invalid directive request on line {line_no}"))?;
        let request = session.resolve(&request);

        let directive = match settings.directive(&request) {
            Ok(directive) => directive,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "Skipping request");
                continue;
            }
        };
        let report = executor.run(directive).await?;
        println!("{}", serde_json::to_string(&report)?);
        session.remember(request, &report);
    }
    Ok(())
}
