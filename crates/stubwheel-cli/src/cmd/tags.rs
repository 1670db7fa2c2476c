//! Tags command

use anyhow::Result;
use stubwheel_core::system::{self, CapabilityOverrides};

/// Show the capability set used for matching.
pub fn tags(overrides: &CapabilityOverrides) -> Result<()> {
    let detected = system::detect(overrides)?;
    if let Some(info) = &detected.interpreter {
        println!("Python: {}", info.describe());
    }
    print!("{}", detected.capability);
    Ok(())
}
