use deploy_rl::error::Error;
use deploy_rl::load_config;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

#[test]
fn test_partial_file_keeps_defaults() {
    let file = write_config(r#"{ "environment": { "numNodes": 5, "nodeCapacity": 8.0 }, "ppo": { "learningRate": 0.001 } }"#);

    let config = load_config(file.path()).unwrap();

    assert_eq!(config.env.num_nodes, 5);
    assert_eq!(config.env.node_capacity, 8.0);
    assert_eq!(config.env.num_actions(), 6, "Five nodes plus the reject action");
    assert_eq!(config.env.observation_dim(), 5 + 2 * 5 + 1);
    assert!((config.ppo.learning_rate - 0.001).abs() < 1e-9);
    assert!((config.ppo.gamma - 0.99).abs() < 1e-6);
    assert_eq!(config.training.rollout_length, 2048);
    assert_eq!(config.training.seed, 42);
}

#[test]
fn test_probabilities_must_sum_to_one() {
    let file = write_config(r#"{ "environment": { "eventProbabilities": [0.5, 0.5, 0.5, 0.0, 0.0] } }"#);
    assert!(matches!(load_config(file.path()), Err(Error::InvalidConfig(_))));
}

#[test]
fn test_non_positive_counts_fail_fast() {
    for json in [
        r#"{ "environment": { "numNodes": 0 } }"#,
        r#"{ "environment": { "numServices": -1 } }"#,
        r#"{ "ppo": { "miniBatchSize": 0 } }"#,
        r#"{ "training": { "rolloutLength": 200, "totalSteps": 100 } }"#,
        r#"{ "ppo": { "gamma": 1.5 } }"#,
    ] {
        let file = write_config(json);
        match load_config(file.path()) {
            Err(Error::InvalidConfig(message)) => assert!(!message.is_empty()),
            other => panic!("Expected InvalidConfig for {}, got {:?}", json, other.map(|_| ())),
        }
    }
}

#[test]
fn test_malformed_json_is_a_parse_error() {
    let file = write_config("{ environment: ");
    assert!(matches!(load_config(file.path()), Err(Error::DeserializationError(_))));
}

#[test]
fn test_failure_limit_cannot_exceed_node_count() {
    let file = write_config(r#"{ "environment": { "numNodes": 3, "maxConcurrentFailures": 4 } }"#);
    match load_config(file.path()) {
        Err(Error::InvalidConfig(message)) => assert!(message.contains("maxConcurrentFailures"), "{}", message),
        other => panic!("Expected InvalidConfig, got {:?}", other.map(|_| ())),
    }

    let file = write_config(r#"{ "environment": { "numNodes": 3, "maxConcurrentFailures": 3 } }"#);
    assert_eq!(load_config(file.path()).unwrap().env.max_concurrent_failures, Some(3));
}
