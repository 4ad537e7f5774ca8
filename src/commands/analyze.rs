use anyhow::{Context, Result};
use clap::ArgMatches;

pub fn run(matches: &ArgMatches) -> Result<()> {
    let text = matches
        .get_one::<String>("text")
        .context("--text is required")?;
    let postprocess = !matches.get_flag("no-postprocess");

    let (_, mut pipeline) = super::build_pipeline(matches)?;
    let response = pipeline.infer(text, postprocess);

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
