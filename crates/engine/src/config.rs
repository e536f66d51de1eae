//! Endpoint configuration parsing
//!
//! The operator hands the engine one string, `"h1:p1,h2:p2|w1,w2"`: the
//! endpoint list and, optionally after `|`, one memory weight per
//! endpoint. Missing weights mean a uniform split.

use moesplit_client::Endpoint;
use moesplit_protocol::MAX_ENDPOINTS;

use crate::error::{EngineError, Result};
use crate::plan::normalize_weights;

/// Environment variable consulted by [`config_from_env`]
pub const ENDPOINTS_ENV: &str = "MOESPLIT_ENDPOINTS";

/// Parse an `endpoints|weights` config string.
///
/// Returns the endpoint list and the normalized weights (summing to 1).
pub fn parse_config(s: &str) -> Result<(Vec<Endpoint>, Vec<f32>)> {
    let s = s.trim();
    if s.is_empty() {
        return Err(EngineError::Config("empty endpoint config".to_string()));
    }

    let (endpoint_part, weight_part) = match s.split_once('|') {
        Some((e, w)) => (e, Some(w)),
        None => (s, None),
    };

    let endpoints = parse_endpoints(endpoint_part)?;

    let weights = match weight_part {
        Some(w) => {
            let weights = parse_weights(w)?;
            if weights.len() != endpoints.len() {
                return Err(EngineError::Config(format!(
                    "{} endpoints but {} weights",
                    endpoints.len(),
                    weights.len()
                )));
            }
            weights
        }
        None => vec![1.0; endpoints.len()],
    };

    let normalized = normalize_weights(&weights)?;
    Ok((endpoints, normalized))
}

/// Read the config string from `MOESPLIT_ENDPOINTS`, if set
pub fn config_from_env() -> Result<Option<(Vec<Endpoint>, Vec<f32>)>> {
    match std::env::var(ENDPOINTS_ENV) {
        Ok(value) => parse_config(&value).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_endpoints(part: &str) -> Result<Vec<Endpoint>> {
    let part = part.trim();
    if part.is_empty() {
        return Err(EngineError::Config("empty endpoint list".to_string()));
    }

    let endpoints: Vec<Endpoint> = part
        .split(',')
        .map(|item| {
            Endpoint::parse(item)
                .map_err(|e| EngineError::Config(format!("bad endpoint '{}': {e}", item.trim())))
        })
        .collect::<Result<_>>()?;

    if endpoints.len() > MAX_ENDPOINTS {
        return Err(EngineError::Config(format!(
            "{} endpoints exceeds the maximum of {MAX_ENDPOINTS}",
            endpoints.len()
        )));
    }
    Ok(endpoints)
}

fn parse_weights(part: &str) -> Result<Vec<f32>> {
    part.split(',')
        .map(|item| {
            let item = item.trim();
            let w: f32 = item
                .parse()
                .map_err(|_| EngineError::Config(format!("non-numeric weight '{item}'")))?;
            if !w.is_finite() || w < 0.0 {
                return Err(EngineError::Config(format!("negative weight '{item}'")));
            }
            Ok(w)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_weights() {
        let (endpoints, weights) =
            parse_config("10.0.0.1:50052,10.0.0.2:50052|24,12").unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].addr(), "10.0.0.1:50052");
        assert_eq!(endpoints[1].addr(), "10.0.0.2:50052");
        assert!((weights[0] - 24.0 / 36.0).abs() < 1e-6);
        assert!((weights[1] - 12.0 / 36.0).abs() < 1e-6);
    }

    #[test]
    fn test_parse_without_weights_is_uniform() {
        let (endpoints, weights) = parse_config("a:1,b:2,c:3").unwrap();
        assert_eq!(endpoints.len(), 3);
        for &w in &weights {
            assert!((w - 1.0 / 3.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_parse_float_weights() {
        let (_, weights) = parse_config("a:1,b:2|0.75,0.25").unwrap();
        assert!((weights[0] - 0.75).abs() < 1e-6);
        assert!((weights[1] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_trailing_whitespace_trimmed() {
        let (endpoints, _) = parse_config("  a:1 , b:2 | 1 , 1  \n").unwrap();
        assert_eq!(endpoints[0].host, "a");
        assert_eq!(endpoints[1].host, "b");
    }

    #[test]
    fn test_count_mismatch_rejected() {
        let err = parse_config("a:1,b:2|1").unwrap_err();
        assert!(err.to_string().contains("2 endpoints but 1 weights"));
    }

    #[test]
    fn test_bad_inputs_rejected() {
        assert!(parse_config("").is_err());
        assert!(parse_config("|1,2").is_err());
        assert!(parse_config("a:1|x").is_err());
        assert!(parse_config("a:1|-1").is_err());
        assert!(parse_config("nocolon|1").is_err());
        assert!(parse_config("a:notaport").is_err());
    }

    #[test]
    fn test_too_many_endpoints_rejected() {
        let list = (0..17)
            .map(|i| format!("h{i}:1"))
            .collect::<Vec<_>>()
            .join(",");
        let err = parse_config(&list).unwrap_err();
        assert!(err.to_string().contains("maximum"));
    }

    #[test]
    fn test_all_zero_weights_become_uniform() {
        let (_, weights) = parse_config("a:1,b:2|0,0").unwrap();
        assert_eq!(weights, vec![0.5, 0.5]);
    }
}
