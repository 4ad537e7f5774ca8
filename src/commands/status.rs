use anyhow::Result;
use clap::ArgMatches;
use serde_json::json;

pub fn run(matches: &ArgMatches) -> Result<()> {
    let (_, pipeline) = super::build_pipeline(matches)?;

    let status = json!({
        "pipeline": pipeline.get_pipeline_info(),
        "system": pipeline.metrics().system_health(),
    });

    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
