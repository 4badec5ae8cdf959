//! Encoding of matrix configurations as a CI matrix axis value.

use crate::agents::AgentCatalog;
use gantry_core::BuildConfig;

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c)
}

/// Quote a word for a POSIX shell, leaving safe words untouched.
pub fn shell_quote(word: &str) -> String {
    if word.is_empty() {
        return "''".to_string();
    }
    if word.chars().all(is_safe_char) {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r#"'"'"'"#))
}

/// One axis entry: the options plus the host selector, quoted as a whole.
pub fn axis_entry(config: &BuildConfig, catalog: &AgentCatalog) -> String {
    let mut words: Vec<String> = config.opts.iter().map(|o| shell_quote(o)).collect();
    if let Some(host) = &config.host {
        let selector = if catalog.is_label(host) {
            format!("label={}", host)
        } else {
            format!("host={}", host)
        };
        words.push(shell_quote(&selector));
    }
    format!("\"{}\"", words.join(" "))
}

/// Axis value listing every configuration, separated by spaces.
pub fn options_axis(configs: &[BuildConfig], catalog: &AgentCatalog) -> String {
    configs
        .iter()
        .map(|c| axis_entry(c, catalog))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(opts: &[&str], host: Option<&str>) -> BuildConfig {
        let mut config = BuildConfig::new(opts.iter().map(|s| s.to_string()).collect());
        config.host = host.map(str::to_string);
        config
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("gcc-4.8"), "gcc-4.8");
        assert_eq!(shell_quote("simd=AVX_256"), "simd=AVX_256");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r#"'it'"'"'s'"#);
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_options_axis() {
        let catalog = AgentCatalog::builtin().unwrap();
        let configs = vec![
            config(&["gcc-4.6", "gpu", "cuda-5.0"], Some("bs_nix1204")),
            config(&["no-mpi"], Some("docker-ubuntu-15.04")),
            config(&["cmake-3.10.0", "extra=a b"], None),
        ];
        assert_eq!(
            options_axis(&configs, &catalog),
            r#""gcc-4.6 gpu cuda-5.0 host=bs_nix1204" "no-mpi label=docker-ubuntu-15.04" "cmake-3.10.0 'extra=a b'""#
        );
    }
}
