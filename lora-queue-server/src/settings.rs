use std::path::Path;

use config::{Config, ConfigError, Environment, File as ConfigFile};
use lora_queue_core::BatchOptions;

/// Default batch options from an optional TOML file, overridden by
/// `LORA_QUEUE__*` environment variables.
pub fn load_batch_defaults(path: Option<&Path>) -> Result<BatchOptions, ConfigError> {
    let file = match path {
        Some(path) => ConfigFile::from(path).required(true),
        None => ConfigFile::with_name("LoraQueue").required(false),
    };

    Config::builder()
        .add_source(file)
        .add_source(Environment::with_prefix("LORA_QUEUE").prefix_separator("__").separator("__"))
        .build()?
        .try_deserialize::<BatchOptions>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lora_queue_core::{Placement, RowPolicy, SeedMode};
    use std::fs;

    #[test]
    fn test_file_values_override_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("LoraQueue.toml");
        fs::write(
            &path,
            r#"
seed_mode = "same"
placement = "append"
directories = ["/", "styles"]

[rows]
fixed = 3

[overlay]
font_size = 20.0
stroke_width = 1
"#,
        )
        .unwrap();

        let options = load_batch_defaults(Some(&path)).unwrap();
        assert_eq!(options.seed_mode, SeedMode::Same);
        assert_eq!(options.placement, Placement::Append);
        assert_eq!(options.rows, RowPolicy::Fixed(3));
        assert_eq!(options.directories, vec!["/", "styles"]);
        assert_eq!(options.overlay.font_size, 20.0);
        assert_eq!(options.overlay.stroke_width, 1);
        assert!(options.overlay.enabled);
        assert!(options.save_grid);
    }

    #[test]
    fn test_missing_required_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load_batch_defaults(Some(&tmp.path().join("absent.toml"))).is_err());
    }
}
