// Pipelines built from a YAML engine config and a phase registry

use phase_engine::{
    Arity, ConfigError, EngineConfig, Implementation, OptionSchema, PhaseDefinition, PhaseInfo,
    PhaseRegistry, RegistryError, StageLoader, Stream, TagLedger,
};
use serde_json::json;
use std::io::Write;
use tempfile::NamedTempFile;

fn registry(loader: StageLoader) -> PhaseRegistry {
    let mut registry = PhaseRegistry::new().with_loader(loader);

    registry.register(
        "scale",
        PhaseDefinition::new(PhaseInfo::new("scale", Arity::OneToOne), |options| {
            let factor = options.get_i64("factor").unwrap_or(1);
            Implementation::transform(move |data, _| Ok(json!(data.as_i64().unwrap_or(0) * factor)))
        })
        .with_schema(OptionSchema::new().integer("factor", 1)),
    );

    registry.register(
        "label",
        PhaseDefinition::new(PhaseInfo::new("label", Arity::OneToOne), |options| {
            let prefix = options.get_str("prefix").unwrap_or_default().to_string();
            Implementation::transform(move |data, rt| {
                rt.tag("labelled", "yes");
                Ok(json!(format!("{}{}", prefix, data)))
            })
        })
        .with_schema(OptionSchema::new().string("prefix", "")),
    );

    registry
}

const CONFIG: &str = r#"
driver:
  max_parallel_tasks: 2
trace:
  enabled: false
pipelines:
  - name: scaled-labels
    phases:
      - phase: scale
        options:
          factor: 10
      - phase: label
        id: label-main
        options:
          prefix: "n="
"#;

#[tokio::test]
async fn test_config_file_builds_runnable_pipeline() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();

    let config = EngineConfig::from_file(file.path()).unwrap();
    let loader = config.apply();
    let registry = registry(loader.clone());
    assert_eq!(registry.names(), vec!["label", "scale"]);

    let pipeline = registry
        .build_pipeline(config.pipeline("scaled-labels").unwrap())
        .unwrap();

    let input = Stream::new();
    input.put(json!(4), TagLedger::new());
    input.put(json!(5), TagLedger::new());
    let output = loader
        .process_stages_with_input(input, &mut [pipeline])
        .await
        .unwrap();

    let mut values: Vec<String> = output
        .snapshot()
        .iter()
        .map(|item| {
            assert!(item.tags.contains("labelled"));
            item.data.as_str().unwrap().to_string()
        })
        .collect();
    values.sort();
    assert_eq!(values, vec!["n=40", "n=50"]);
}

#[test]
fn test_bad_option_in_config() {
    let config = EngineConfig::from_yaml(
        r#"
pipelines:
  - name: broken
    phases:
      - phase: scale
        options:
          factor: lots
"#,
    )
    .unwrap();

    let err = registry(StageLoader::new())
        .build_pipeline(&config.pipelines[0])
        .unwrap_err();
    assert!(matches!(err, RegistryError::Option { ref phase, .. } if phase == "scale"));
}

#[test]
fn test_unknown_phase_in_config() {
    let config = EngineConfig::from_yaml(
        r#"
pipelines:
  - name: broken
    phases:
      - phase: teleport
"#,
    )
    .unwrap();

    let err = registry(StageLoader::new())
        .build_pipeline(&config.pipelines[0])
        .unwrap_err();
    assert!(matches!(err, RegistryError::UnknownPhase(_)));
}

#[test]
fn test_malformed_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"driver: [unclosed").unwrap();

    let err = EngineConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::ParseError(_)));
}
