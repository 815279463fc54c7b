//! Boolean spellings accepted by flags and environment knobs.

/// Parse `1`, `t`, `true` and their false counterparts, in lower, upper or
/// title case.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
