//! `stencil ensure`: fail unless environment variables are set.

use anyhow::{bail, Result};
use clap::Args;

/// Arguments for `stencil ensure`.
#[derive(Args, Debug)]
pub struct EnsureArgs {
    /// Variables to check.
    #[arg(value_name = "VAR", required = true)]
    pub vars: Vec<String>,

    /// Succeed when at least one variable is set, instead of all of them.
    #[arg(short = 'a', long)]
    pub at_least_one: bool,
}

impl EnsureArgs {
    pub fn run(self) -> Result<()> {
        let lookup = |name: &str| std::env::var_os(name).map(|v| v.to_string_lossy().to_string());
        if self.at_least_one {
            check_at_least_one(&self.vars, lookup)
        } else {
            check_all(&self.vars, lookup)
        }
    }
}

fn is_set(value: Option<String>) -> bool {
    value.is_some_and(|v| !v.is_empty())
}

fn check_all<F>(vars: &[String], lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let missing: Vec<&str> = vars
        .iter()
        .map(String::as_str)
        .filter(|name| !is_set(lookup(name)))
        .collect();
    if !missing.is_empty() {
        bail!("environment variables are missing: [{}]", missing.join(", "));
    }
    Ok(())
}

fn check_at_least_one<F>(vars: &[String], lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if vars.iter().any(|name| is_set(lookup(name))) {
        return Ok(());
    }
    bail!(
        "none of the specified environment variables is present: [{}]",
        vars.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn all_requires_every_variable_non_empty() {
        let lookup = env(&[("A", "1"), ("B", "")]);
        assert!(check_all(&names(&["A"]), &lookup).is_ok());
        let err = check_all(&names(&["A", "B", "C"]), &lookup).unwrap_err();
        assert_eq!(err.to_string(), "environment variables are missing: [B, C]");
    }

    #[test]
    fn at_least_one_needs_a_single_match() {
        let lookup = env(&[("B", "x")]);
        assert!(check_at_least_one(&names(&["A", "B"]), &lookup).is_ok());
        let err = check_at_least_one(&names(&["A", "C"]), &lookup).unwrap_err();
        assert!(err.to_string().contains("[A, C]"));
    }
}
