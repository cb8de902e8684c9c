//! Output formatting: JSON, compact JSON, YAML.
//!
//! Renders data in the format selected by `--output`. Maps are emitted
//! with sorted keys.

use std::io::{self, Write};

use crate::cli::OutputFormat;
use crate::error::CliError;

/// Render a serde-serializable value in the chosen format.
pub fn render<T: serde::Serialize + ?Sized>(
    format: OutputFormat,
    data: &T,
) -> Result<String, CliError> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(data)?,
        OutputFormat::JsonCompact => serde_json::to_string(data)?,
        OutputFormat::Yaml => serde_yaml::to_string(data)?,
    };
    Ok(rendered)
}

/// Print rendered output to stdout with a single trailing newline.
pub fn print_output(output: &str) -> Result<(), CliError> {
    if output.is_empty() {
        return Ok(());
    }
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", output.trim_end_matches('\n'))?;
    stdout.flush()?;
    Ok(())
}

/// Render and print in one step.
pub fn emit<T: serde::Serialize + ?Sized>(format: OutputFormat, data: &T) -> Result<(), CliError> {
    print_output(&render(format, data)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn sample() -> BTreeMap<&'static str, &'static str> {
        BTreeMap::from([("value", "87"), ("device", "ups")])
    }

    #[test]
    fn json_is_pretty_and_sorted() {
        let out = render(OutputFormat::Json, &sample()).unwrap();
        assert_eq!(out, "{\n  \"device\": \"ups\",\n  \"value\": \"87\"\n}");
    }

    #[test]
    fn compact_json_is_one_line() {
        let out = render(OutputFormat::JsonCompact, &sample()).unwrap();
        assert_eq!(out, r#"{"device":"ups","value":"87"}"#);
    }

    #[test]
    fn yaml_renders_mappings() {
        let out = render(OutputFormat::Yaml, &sample()).unwrap();
        assert!(out.contains("device: ups"));
        assert!(out.contains("value: '87'"));
    }
}
