//! Display name and prompt fragment resolution for a single model.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use safetensors::tensor::Metadata;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::CatalogConfig;
use crate::error::{Error, Result};

const WEIGHT_KEY: &str = "preferred weight";
const ACTIVATION_KEY: &str = "activation text";
/// Largest header safetensors itself accepts.
const MAX_HEADER_SIZE: u64 = 100_000_000;

/// Reads the free-form metadata embedded in a model file.
pub trait MetadataReader: Send + Sync {
    fn read(&self, model_path: &Path) -> Result<HashMap<String, String>>;
}

/// Reads the `__metadata__` table of a safetensors file.
#[derive(Debug, Default, Clone, Copy)]
pub struct SafetensorsMetadata;

impl MetadataReader for SafetensorsMetadata {
    /// Only the length prefix and the JSON header are read, never the tensors.
    fn read(&self, model_path: &Path) -> Result<HashMap<String, String>> {
        let mut file = File::open(model_path)?;
        let file_len = file.metadata()?.len();

        let mut prefix = [0u8; 8];
        file.read_exact(&mut prefix)?;
        let header_len = u64::from_le_bytes(prefix);
        if header_len > MAX_HEADER_SIZE || header_len > file_len.saturating_sub(8) {
            return Err(Error::metadata(
                model_path,
                format!("invalid header length {}", header_len),
            ));
        }

        let mut header = Vec::with_capacity(header_len as usize);
        file.take(header_len).read_to_end(&mut header)?;
        let metadata: Metadata =
            serde_json::from_slice(&header).map_err(|e| Error::metadata(model_path, e))?;
        Ok(metadata.metadata().clone().unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelMetadata {
    pub display_name: String,
    pub prompt_fragment: String,
}

impl ModelMetadata {
    /// What a model contributes when nothing better is known about it.
    pub fn fallback(stem: &str) -> Self {
        Self {
            display_name: stem.to_string(),
            prompt_fragment: lora_tag(stem, 1.0),
        }
    }
}

/// Sidecar contents after coercion.
#[derive(Debug, Clone, PartialEq)]
pub struct Sidecar {
    pub weight: f64,
    pub activation_text: String,
}

impl Sidecar {
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text).map_err(|reason| Error::metadata(path, reason))
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
        let Value::Object(fields) = value else {
            return Err("sidecar is not a JSON object".to_string());
        };

        let weight = match fields.get(WEIGHT_KEY).map(coerce_weight) {
            None => 1.0,
            Some(Some(weight)) if weight != 0.0 => weight,
            Some(_) => {
                debug!("Unusable {:?} {:?}, using 1", WEIGHT_KEY, fields.get(WEIGHT_KEY));
                1.0
            }
        };
        let activation_text = fields
            .get(ACTIVATION_KEY)
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            weight,
            activation_text,
        })
    }
}

fn coerce_weight(value: &Value) -> Option<f64> {
    let weight = match value {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse().ok()?,
        _ => return None,
    };
    weight.is_finite().then_some(weight)
}

/// `<lora:name:weight>`, with integral weights printed without a fraction.
pub fn lora_tag(name: &str, weight: f64) -> String {
    format!("<lora:{}:{}>", name, weight)
}

pub struct MetadataResolver<R = SafetensorsMetadata> {
    reader: R,
    prefer_filename: bool,
    name_field: String,
}

impl MetadataResolver<SafetensorsMetadata> {
    pub fn new(config: &CatalogConfig) -> Self {
        Self::with_reader(config, SafetensorsMetadata)
    }
}

impl<R: MetadataReader> MetadataResolver<R> {
    pub fn with_reader(config: &CatalogConfig, reader: R) -> Self {
        Self {
            reader,
            prefer_filename: config.prefer_filename,
            name_field: config.name_field.clone(),
        }
    }

    /// Resolves the fragment for `model_path`. A missing sidecar yields the
    /// filename fallback; an unreadable one is an error the caller must
    /// turn into [`ModelMetadata::fallback`].
    pub fn resolve(&self, model_path: &Path, sidecar: Option<&Path>) -> Result<ModelMetadata> {
        let stem = file_stem(model_path);
        let Some(sidecar) = sidecar else {
            return Ok(ModelMetadata::fallback(&stem));
        };

        let Sidecar {
            weight,
            activation_text,
        } = Sidecar::read(sidecar)?;
        let display_name = self.display_name(model_path, &stem);

        let tag = lora_tag(&display_name, weight);
        let prompt_fragment = if activation_text.is_empty() {
            tag
        } else {
            format!("{}, {}", tag, activation_text)
        };

        Ok(ModelMetadata {
            display_name,
            prompt_fragment,
        })
    }

    fn display_name(&self, model_path: &Path, stem: &str) -> String {
        if self.prefer_filename {
            return stem.to_string();
        }

        match self.reader.read(model_path) {
            Ok(mut metadata) => match metadata.remove(&self.name_field) {
                Some(name) if !name.trim().is_empty() => name.trim().to_string(),
                _ => stem.to_string(),
            },
            Err(err) => {
                warn!("No embedded name for {}: {}", model_path.display(), err);
                stem.to_string()
            }
        }
    }
}

pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}
