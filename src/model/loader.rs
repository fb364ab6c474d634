//! JSON scenario loading
//!
//! Scenario requests arrive as JSON documents. Field defaults are applied
//! by serde so sparse hand-written scenarios stay short.

use super::ScenarioRequest;
use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Load a scenario request from a JSON file
pub fn load_scenario<P: AsRef<Path>>(path: P) -> Result<ScenarioRequest, Box<dyn Error>> {
    let file = File::open(path)?;
    let request = serde_json::from_reader(BufReader::new(file))?;
    Ok(request)
}

/// Load a scenario request from any reader
pub fn load_scenario_from_reader<R: std::io::Read>(
    reader: R,
) -> Result<ScenarioRequest, Box<dyn Error>> {
    Ok(serde_json::from_reader(reader)?)
}
