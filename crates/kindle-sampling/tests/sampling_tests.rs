//! Tests for sampling policy validation and presets.

use kindle_sampling::{SamplingConfig, SamplingError, SamplingParams};

// -- Presets --

#[test]
fn warmup_preset_is_single_greedy_token() {
    let config = SamplingConfig::warmup();
    assert_eq!(config.max_tokens(), 1);
    assert_eq!(config.temperature(), 0.0);
    assert!(config.is_greedy());
    assert!(!config.delta_mode());
}

#[test]
fn conversation_preset_values() {
    let config = SamplingConfig::conversation();
    assert_eq!(config.max_tokens(), 1024);
    assert_eq!(config.temperature(), 0.5);
    assert_eq!(config.top_p(), 0.85);
    assert_eq!(config.top_k(), 25);
    assert_eq!(config.repetition_penalty(), 1.1);
    assert!(config.delta_mode());
    assert!(!config.is_greedy());
}

#[test]
fn default_params_match_conversation_preset() {
    let config = SamplingParams::default().validate().unwrap();
    assert_eq!(config, SamplingConfig::conversation());
}

// -- Validation --

#[test]
fn zero_max_tokens_rejected() {
    let err = SamplingParams::new().with_max_tokens(0).validate();
    assert_eq!(err, Err(SamplingError::InvalidMaxTokens));
}

#[test]
fn negative_temperature_rejected() {
    let err = SamplingParams::new().with_temperature(-0.1).validate();
    assert_eq!(err, Err(SamplingError::InvalidTemperature(-0.1)));
}

#[test]
fn zero_temperature_allowed() {
    let config = SamplingParams::new().with_temperature(0.0).validate().unwrap();
    assert!(config.is_greedy());
}

#[test]
fn top_p_bounds() {
    assert_eq!(
        SamplingParams::new().with_top_p(0.0).validate(),
        Err(SamplingError::InvalidTopP(0.0))
    );
    assert_eq!(
        SamplingParams::new().with_top_p(1.5).validate(),
        Err(SamplingError::InvalidTopP(1.5))
    );
    assert!(SamplingParams::new().with_top_p(1.0).validate().is_ok());
}

#[test]
fn top_k_zero_means_disabled() {
    let config = SamplingParams::new().with_top_k(0).validate().unwrap();
    assert_eq!(config.top_k(), 0);
}

#[test]
fn repetition_penalty_must_be_positive() {
    assert_eq!(
        SamplingParams::new().with_repetition_penalty(0.0).validate(),
        Err(SamplingError::InvalidRepetitionPenalty(0.0))
    );
    assert!(SamplingParams::new()
        .with_repetition_penalty(f32::INFINITY)
        .validate()
        .is_err());
}

#[test]
fn try_from_matches_validate() {
    let params = SamplingParams::new().with_max_tokens(8).with_temperature(0.2);
    let config = SamplingConfig::try_from(params.clone()).unwrap();
    assert_eq!(config, params.validate().unwrap());
}

#[test]
fn error_messages_name_the_field() {
    let msg = SamplingError::InvalidTopP(2.0).to_string();
    assert!(msg.contains("top_p"), "got: {msg}");
}

// -- Serde --

#[test]
fn params_from_partial_json_fill_defaults() {
    let json = r#"{ "max_tokens": 64, "temperature": 0.9 }"#;
    let params: SamplingParams = serde_json::from_str(json).unwrap();
    assert_eq!(params.max_tokens, 64);
    assert_eq!(params.temperature, 0.9);
    assert_eq!(params.top_p, 0.85);
    assert_eq!(params.top_k, 25);
    assert!(params.delta_mode);
}

#[test]
fn config_serializes_as_flat_fields() {
    let value = serde_json::to_value(SamplingConfig::warmup()).unwrap();
    assert_eq!(value["max_tokens"], 1);
    assert_eq!(value["delta_mode"], false);
}
