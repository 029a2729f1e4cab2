//! URL expansion helpers for the `mutate` subcommand.

use url::Url;

use crate::error::ProbeError;

/// Replace the base URL's path with each entry of `paths`, yielding full
/// probe URLs.
pub fn pitchfork(base: &str, paths: &[String]) -> Result<Vec<String>, ProbeError> {
    let mut url = Url::parse(base).map_err(|err| ProbeError::Config {
        url: base.to_string(),
        reason: err.to_string(),
    })?;

    let mut out = Vec::with_capacity(paths.len());
    for path in paths {
        url.set_path(path);
        out.push(url.as_str().to_string());
    }
    Ok(out)
}

/// Cross-multiply prefixes and paths: every `prefix/path` combination.
/// Either list being empty yields an empty result.
pub fn prefix(prefixes: &[String], paths: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(prefixes.len() * paths.len());
    for pre in prefixes {
        for path in paths {
            out.push(format!("{pre}/{path}"));
        }
    }
    out
}
