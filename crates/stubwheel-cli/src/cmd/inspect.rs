//! Inspect command

use anyhow::Result;
use stubwheel_schema::ArtifactFilename;

/// Print what a filename says about its artifact.
pub fn inspect(filename: &str) -> Result<()> {
    let artifact = ArtifactFilename::parse(filename)?;
    let identifier = artifact.identifier();

    match &artifact {
        ArtifactFilename::Wheel(wheel) => {
            println!("kind:    wheel");
            println!("name:    {}", identifier.name.canonical());
            println!("version: {}", identifier.version);
            if let Some(build) = &wheel.build {
                println!("build:   {build}");
            }
            println!("tags:");
            for tag in &wheel.tags {
                println!("  {tag}");
            }
        }
        ArtifactFilename::Sdist(_) => {
            println!("kind:    sdist");
            println!("name:    {}", identifier.name.canonical());
            println!("version: {}", identifier.version);
        }
    }
    Ok(())
}
