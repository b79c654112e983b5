//! Lightweight shell-script detection performed once at intake.
//!
//! Only the first line is inspected. Anything past the shebang is the
//! interpreter's business.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::CoreError;

/// Accepted shebang lines: `sh` or `bash` under `/bin` or `/usr/bin`, or
/// resolved through `/usr/bin/env`, optionally followed by arguments.
const SHEBANG_PATTERN: &str = r"^#!\s*(?:(?:/usr)?/bin/(?:ba)?sh|/usr/bin/env\s+(?:ba)?sh)(?:\s.*)?$";

static SHEBANG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(SHEBANG_PATTERN).expect("valid regex"));

/// Whether the first line of `source` is a recognised shell shebang.
pub fn is_shell_script(source: &str) -> bool {
    let first_line = source.lines().next().unwrap_or_default();
    SHEBANG_RE.is_match(first_line.trim_end_matches('\r'))
}

/// Validate a submitted script body.
pub fn validate_script(source: &str) -> Result<(), CoreError> {
    if is_shell_script(source) {
        Ok(())
    } else {
        Err(CoreError::Validation(
            "Not a shell script: first line must be a #!/bin/sh or #!/bin/bash shebang".into(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
