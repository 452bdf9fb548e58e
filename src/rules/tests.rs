// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::*;
use crate::config::ServerUrlConfig;

fn server(url: &str) -> ServerUrlConfig {
    ServerUrlConfig {
        url: url.to_string(),
        ..Default::default()
    }
}

#[test]
fn test_passthrough_when_no_credentials() {
    let rule = TargetServerRule::from_config(server("https://gis.example.com/arcgis")).unwrap();

    assert_eq!(rule.mode, AuthMode::Passthrough);
    assert!(!rule.mode.requires_token());
    assert!(rule.token_endpoint().is_none());
}

#[test]
fn test_user_login_without_token_endpoint() {
    let rule = TargetServerRule::from_config(ServerUrlConfig {
        username: Some("svc".into()),
        password: Some("pw".into()),
        ..server("https://gis.example.com/secure")
    })
    .unwrap();

    assert_eq!(
        rule.mode,
        AuthMode::UserLogin {
            username: "svc".into(),
            password: "pw".into()
        }
    );
}

#[test]
fn test_token_login_with_vendor_endpoint() {
    let rule = TargetServerRule::from_config(ServerUrlConfig {
        username: Some("svc".into()),
        password: Some("pw".into()),
        token_url: Some("https://gis.example.com/arcgis/tokens/generateToken".into()),
        ..server("https://gis.example.com/arcgis")
    })
    .unwrap();

    assert!(rule.mode.requires_token());
    assert_eq!(
        rule.token_endpoint(),
        Some(&TokenEndpoint::Vendor(
            "https://gis.example.com/arcgis/tokens/generateToken".into()
        ))
    );
}

#[test]
fn test_user_password_with_oauth2_endpoint_is_user_login() {
    let rule = TargetServerRule::from_config(ServerUrlConfig {
        username: Some("svc".into()),
        password: Some("pw".into()),
        oauth2_endpoint: Some("https://www.example.com/sharing/oauth2/token".into()),
        ..server("https://gis.example.com/secure")
    })
    .unwrap();

    assert_eq!(rule.mode.name(), "user-login");
    assert!(!rule.mode.requires_token());
    assert!(rule.token_endpoint().is_none());
}

#[test]
fn test_token_login_always_uses_the_vendor_endpoint() {
    let rule = TargetServerRule::from_config(ServerUrlConfig {
        username: Some("svc".into()),
        password: Some("pw".into()),
        oauth2_endpoint: Some("https://www.example.com/sharing/oauth2/token".into()),
        token_url: Some("https://gis.example.com/arcgis/tokens/generateToken".into()),
        ..server("https://gis.example.com/arcgis")
    })
    .unwrap();

    assert_eq!(rule.mode.name(), "token-login");
    assert_eq!(
        rule.token_endpoint(),
        Some(&TokenEndpoint::Vendor(
            "https://gis.example.com/arcgis/tokens/generateToken".into()
        ))
    );
}

#[test]
fn test_oauth2_endpoint_takes_precedence_over_vendor() {
    let rule = TargetServerRule::from_config(ServerUrlConfig {
        client_id: Some("app".into()),
        client_secret: Some("secret".into()),
        oauth2_endpoint: Some("https://www.example.com/sharing/oauth2/token".into()),
        token_url: Some("https://gis.example.com/tokens/generateToken".into()),
        ..server("https://services.example.com/")
    })
    .unwrap();

    assert_eq!(rule.mode.name(), "app-login");
    assert!(matches!(rule.token_endpoint(), Some(TokenEndpoint::OAuth2(_))));
}

#[test]
fn test_app_login_without_endpoint_is_allowed_at_load() {
    let rule = TargetServerRule::from_config(ServerUrlConfig {
        client_id: Some("app".into()),
        client_secret: Some("secret".into()),
        ..server("https://services.example.com/")
    })
    .unwrap();

    assert!(rule.mode.requires_token());
    assert!(rule.token_endpoint().is_none());
}

#[test]
fn test_blank_fields_count_as_missing() {
    let rule = TargetServerRule::from_config(ServerUrlConfig {
        username: Some("svc".into()),
        password: Some("   ".into()),
        ..server("https://gis.example.com/arcgis")
    })
    .unwrap();

    assert_eq!(rule.mode, AuthMode::Passthrough);
}

#[test]
fn test_ambiguous_credentials_are_rejected() {
    let err = TargetServerRule::from_config(ServerUrlConfig {
        username: Some("svc".into()),
        password: Some("pw".into()),
        client_id: Some("app".into()),
        client_secret: Some("secret".into()),
        ..server("https://gis.example.com/arcgis")
    })
    .unwrap_err();

    assert!(matches!(err, ConfigError::InvalidRule { .. }));
}

#[test]
fn test_debug_output_hides_secrets() {
    let rule = TargetServerRule::from_config(ServerUrlConfig {
        client_id: Some("app".into()),
        client_secret: Some("top-secret".into()),
        ..server("https://services.example.com/")
    })
    .unwrap();

    let rendered = format!("{:?}", rule);
    assert!(rendered.contains("app"));
    assert!(!rendered.contains("top-secret"));
}

#[test]
fn test_find_returns_rule_only_for_prefixed_urls() {
    let rules = RuleSet::from_configs(vec![server("https://gis.example.com/arcgis")]).unwrap();

    assert!(rules.find("https://gis.example.com/arcgis/rest/services?f=json").is_some());
    assert!(rules.find("https://gis.example.com/other").is_none());
    assert!(rules.find("https://gis.example.com").is_none());
    assert!(rules.find("").is_none());
}

#[test]
fn test_find_is_case_insensitive() {
    let rules = RuleSet::from_configs(vec![server("https://GIS.example.com/ArcGIS")]).unwrap();

    let rule = rules.find("https://gis.example.com/arcgis/rest").unwrap();
    assert_eq!(rule.url, "https://GIS.example.com/ArcGIS");
}

#[test]
fn test_find_prefers_longest_prefix() {
    let rules = RuleSet::from_configs(vec![
        server("https://gis.example.com/"),
        server("https://gis.example.com/arcgis/rest/services/secure"),
        server("https://gis.example.com/arcgis"),
    ])
    .unwrap();

    let rule = rules
        .find("https://gis.example.com/arcgis/rest/services/secure/MapServer/0")
        .unwrap();
    assert_eq!(rule.url, "https://gis.example.com/arcgis/rest/services/secure");

    let rule = rules.find("https://gis.example.com/arcgis/rest/info").unwrap();
    assert_eq!(rule.url, "https://gis.example.com/arcgis");

    let rule = rules.find("https://gis.example.com/portal").unwrap();
    assert_eq!(rule.url, "https://gis.example.com/");
}

#[test]
fn test_duplicate_urls_are_rejected() {
    let err = RuleSet::from_configs(vec![
        server("https://gis.example.com/arcgis"),
        server("https://GIS.example.com/arcgis/"),
    ])
    .unwrap_err();

    assert!(err.to_string().contains("duplicate url"));
}

#[test]
fn test_empty_url_is_rejected() {
    assert!(RuleSet::from_configs(vec![server("  ")]).is_err());
}

#[test]
fn test_loaded_flag() {
    assert!(!RuleSet::unconfigured().is_loaded());
    assert!(RuleSet::from_configs(Vec::new()).unwrap().is_loaded());
}
