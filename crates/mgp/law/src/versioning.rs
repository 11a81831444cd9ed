//! Version ranges as comma-separated AND clauses, e.g. `>=2.0.0,<3.0.0`.
//!
//! Only `major.minor.patch` takes part in comparisons; pre-release and build
//! suffixes are accepted but ignored.

use semver::Version;

use crate::error::{LawError, LawResult};

const OPERATORS: [&str; 6] = [">=", "<=", ">", "<", "==", "="];

pub fn parse_semver(value: &str) -> LawResult<(u64, u64, u64)> {
    let v = Version::parse(value.trim()).map_err(|_| LawError::InvalidSemver(value.to_string()))?;
    Ok((v.major, v.minor, v.patch))
}

fn eval_clause(version: (u64, u64, u64), clause: &str) -> LawResult<bool> {
    let clause = clause.trim();
    let (op, rhs) = OPERATORS
        .iter()
        .find_map(|op| clause.strip_prefix(op).map(|rest| (*op, rest)))
        .unwrap_or(("==", clause));
    let rhs = parse_semver(rhs)?;
    Ok(match op {
        ">=" => version >= rhs,
        "<=" => version <= rhs,
        ">" => version > rhs,
        "<" => version < rhs,
        _ => version == rhs,
    })
}

/// An empty range matches everything.
pub fn semver_satisfies(version: &str, range: &str) -> LawResult<bool> {
    let version = parse_semver(version)?;
    for clause in range.split(',').filter(|c| !c.trim().is_empty()) {
        if !eval_clause(version, clause)? {
            return Ok(false);
        }
    }
    Ok(true)
}
