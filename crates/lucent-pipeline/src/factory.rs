//! Component creation from text specs.
//!
//! A spec is a component name with optional flag arguments, e.g.
//! `tiled(-tilesize 16)` or `cyclic`. This is the form configuration files
//! and command lines use to pick pipeline pieces.

use std::sync::Arc;

use thiserror::Error;

use lucent_interface::{
    ImageTraverser, LoadBalancer, PixelSampler, Renderer, SampleGenerator, ShadowAlgorithm,
};

use crate::balance::{ContiguousLoadBalancer, CyclicLoadBalancer};
use crate::render::{FlatRenderer, NoShadows};
use crate::sample::{CenterSampleGenerator, SimplePixelSampler, UniformSampleGenerator};
use crate::traverse::TiledImageTraverser;

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("malformed component spec {0:?}")]
    Parse(String),
    #[error("unknown {kind} {name:?}")]
    UnknownComponent { kind: &'static str, name: String },
    #[error("bad argument {flag:?}: {reason}")]
    BadArgument { flag: String, reason: String },
}

/// A parsed `name(-flag value ...)` spec.
#[derive(Debug, PartialEq, Eq)]
struct ComponentSpec {
    name: String,
    args: Vec<(String, String)>,
}

impl ComponentSpec {
    fn parse(input: &str) -> Result<Self, FactoryError> {
        let input = input.trim();
        let (name, args) = match input.split_once('(') {
            None => (input, ""),
            Some((name, rest)) => {
                let args = rest
                    .strip_suffix(')')
                    .ok_or_else(|| FactoryError::Parse(input.to_string()))?;
                (name.trim(), args)
            }
        };
        if name.is_empty() {
            return Err(FactoryError::Parse(input.to_string()));
        }

        let mut parsed = Vec::new();
        let mut tokens = args.split_whitespace();
        while let Some(token) = tokens.next() {
            let flag = token
                .strip_prefix('-')
                .ok_or_else(|| FactoryError::Parse(input.to_string()))?;
            let value = tokens
                .next()
                .ok_or_else(|| FactoryError::BadArgument {
                    flag: flag.to_string(),
                    reason: "missing value".to_string(),
                })?;
            parsed.push((flag.to_string(), value.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            args: parsed,
        })
    }

    fn arg<T: std::str::FromStr>(&self, flag: &str) -> Result<Option<T>, FactoryError>
    where
        T::Err: std::fmt::Display,
    {
        for (name, value) in &self.args {
            if name == flag {
                return value
                    .parse()
                    .map(Some)
                    .map_err(|err: T::Err| FactoryError::BadArgument {
                        flag: flag.to_string(),
                        reason: err.to_string(),
                    });
            }
        }
        Ok(None)
    }
}

pub fn create_load_balancer(spec: &str) -> Result<Arc<dyn LoadBalancer>, FactoryError> {
    let spec = ComponentSpec::parse(spec)?;
    match spec.name.as_str() {
        "contiguous" => Ok(Arc::new(ContiguousLoadBalancer)),
        "cyclic" => Ok(Arc::new(CyclicLoadBalancer)),
        _ => Err(FactoryError::UnknownComponent {
            kind: "load balancer",
            name: spec.name,
        }),
    }
}

pub fn create_image_traverser(spec: &str) -> Result<Arc<dyn ImageTraverser>, FactoryError> {
    let spec = ComponentSpec::parse(spec)?;
    match spec.name.as_str() {
        "tiled" => {
            let traverser = match spec.arg::<u32>("tilesize")? {
                Some(size) => TiledImageTraverser::new(size),
                None => TiledImageTraverser::default(),
            };
            Ok(Arc::new(traverser))
        }
        _ => Err(FactoryError::UnknownComponent {
            kind: "image traverser",
            name: spec.name,
        }),
    }
}

pub fn create_pixel_sampler(spec: &str) -> Result<Arc<dyn PixelSampler>, FactoryError> {
    let spec = ComponentSpec::parse(spec)?;
    match spec.name.as_str() {
        "simple" => Ok(Arc::new(SimplePixelSampler)),
        _ => Err(FactoryError::UnknownComponent {
            kind: "pixel sampler",
            name: spec.name,
        }),
    }
}

pub fn create_renderer(spec: &str) -> Result<Arc<dyn Renderer>, FactoryError> {
    let spec = ComponentSpec::parse(spec)?;
    match spec.name.as_str() {
        "flat" => Ok(Arc::new(FlatRenderer)),
        _ => Err(FactoryError::UnknownComponent {
            kind: "renderer",
            name: spec.name,
        }),
    }
}

pub fn create_sample_generator(spec: &str) -> Result<Arc<dyn SampleGenerator>, FactoryError> {
    let spec = ComponentSpec::parse(spec)?;
    match spec.name.as_str() {
        "uniform" => Ok(Arc::new(UniformSampleGenerator)),
        "center" => Ok(Arc::new(CenterSampleGenerator)),
        _ => Err(FactoryError::UnknownComponent {
            kind: "sample generator",
            name: spec.name,
        }),
    }
}

pub fn create_shadow_algorithm(spec: &str) -> Result<Arc<dyn ShadowAlgorithm>, FactoryError> {
    let spec = ComponentSpec::parse(spec)?;
    match spec.name.as_str() {
        "noshadows" => Ok(Arc::new(NoShadows)),
        _ => Err(FactoryError::UnknownComponent {
            kind: "shadow algorithm",
            name: spec.name,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_names_parse_without_arguments() {
        let spec = ComponentSpec::parse(" cyclic ").unwrap();
        assert_eq!(spec.name, "cyclic");
        assert!(spec.args.is_empty());
    }

    #[test]
    fn flags_and_values_parse_in_pairs() {
        let spec = ComponentSpec::parse("tiled(-tilesize 16)").unwrap();
        assert_eq!(spec.name, "tiled");
        assert_eq!(spec.arg::<u32>("tilesize").unwrap(), Some(16));
        assert_eq!(spec.arg::<u32>("absent").unwrap(), None);
    }

    #[test]
    fn malformed_specs_are_rejected() {
        assert!(matches!(
            ComponentSpec::parse("tiled(-tilesize 16"),
            Err(FactoryError::Parse(_))
        ));
        assert!(matches!(
            ComponentSpec::parse("tiled(-tilesize)"),
            Err(FactoryError::BadArgument { .. })
        ));
        assert!(matches!(
            ComponentSpec::parse("tiled(tilesize 16)"),
            Err(FactoryError::Parse(_))
        ));
        assert!(matches!(
            ComponentSpec::parse(""),
            Err(FactoryError::Parse(_))
        ));
    }

    #[test]
    fn non_numeric_tile_size_is_a_bad_argument() {
        assert!(matches!(
            create_image_traverser("tiled(-tilesize wide)"),
            Err(FactoryError::BadArgument { .. })
        ));
    }

    #[test]
    fn unknown_names_name_the_component_kind() {
        let err = create_load_balancer("fancy").err().unwrap();
        assert_eq!(err.to_string(), "unknown load balancer \"fancy\"");
    }
}
